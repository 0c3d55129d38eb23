// Error values surfaced to the outer application
// Internal failures travel as anyhow errors and are mapped to one of these codes at the session boundary

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes reported to callers of the provider commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "LOGIN_FAILEDCONNECTION")]
    LoginFailedConnection,
    #[serde(rename = "LOGIN_BADCREDENTIALS")]
    LoginBadCredentials,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl ErrorCode {
    /// Wire name of the code, as the outer application expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LoginFailedConnection => "LOGIN_FAILEDCONNECTION",
            ErrorCode::LoginBadCredentials => "LOGIN_BADCREDENTIALS",
            ErrorCode::Offline => "OFFLINE",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Human readable description used when no more specific message exists
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::LoginFailedConnection => "Error connecting to server",
            ErrorCode::LoginBadCredentials => "User credentials are invalid",
            ErrorCode::Offline => "User is currently offline",
            ErrorCode::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{errcode, message}` pair every failed command completes with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{errcode}: {message}")]
pub struct SocialError {
    pub errcode: ErrorCode,
    pub message: String,
}

impl SocialError {
    pub fn new(errcode: ErrorCode, message: impl Into<String>) -> Self {
        SocialError {
            errcode,
            message: message.into(),
        }
    }

    /// Error carrying the code's default description
    pub fn from_code(errcode: ErrorCode) -> Self {
        SocialError::new(errcode, errcode.description())
    }

    pub fn failed_connection(message: impl Into<String>) -> Self {
        SocialError::new(ErrorCode::LoginFailedConnection, message)
    }

    pub fn bad_credentials() -> Self {
        SocialError::from_code(ErrorCode::LoginBadCredentials)
    }

    pub fn offline() -> Self {
        SocialError::from_code(ErrorCode::Offline)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        SocialError::new(ErrorCode::Unknown, message)
    }
}

/// Result type returned by every provider command
pub type SocialResult<T> = std::result::Result<T, SocialError>;
