// Credential view seam
// The view is an external UI that answers once with `{cmd: 'auth', message: {userId, host, port}}`
// or `{cmd: 'error'}`; this module turns that answer into credentials or a login error.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::{is_valid_nick, Credentials, LoginOptions};
use crate::error::{ErrorCode, SocialError, SocialResult};

/// One-shot reply from a credential view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMessage {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl ViewMessage {
    pub fn auth(user_id: &str, host: &str, port: &str) -> Self {
        ViewMessage {
            cmd: "auth".to_string(),
            message: Some(serde_json::json!({
                "userId": user_id,
                "host": host,
                "port": port,
            })),
        }
    }

    pub fn error() -> Self {
        ViewMessage {
            cmd: "error".to_string(),
            message: None,
        }
    }
}

/// An open credential form. `show` may be called once; the receiver resolves with the
/// user's answer, or errors if the view goes away without answering.
pub trait CredentialView: Send + Sync {
    fn show(&mut self, form_id: &str) -> oneshot::Receiver<ViewMessage>;
    fn close(&mut self);
}

/// Opens a fresh view for every login attempt
pub trait CredentialViewProvider: Send + Sync {
    fn open(&self) -> Box<dyn CredentialView>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCredentials {
    user_id: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: Value,
    #[serde(default)]
    room: Option<String>,
}

/// Turn the view's answer into credentials.
///
/// `None` means the view was dropped without answering, which counts as the view's
/// error signal.
pub fn resolve_credentials(
    reply: Option<ViewMessage>,
    options: &LoginOptions,
    default_port: u16,
) -> SocialResult<Credentials> {
    let reply = match reply {
        Some(reply) => reply,
        None => {
            warn!("Credential view closed without answering");
            return Err(SocialError::failed_connection("Credential view was cancelled"));
        }
    };

    match reply.cmd.as_str() {
        "auth" => {}
        "error" => return Err(SocialError::from_code(ErrorCode::LoginFailedConnection)),
        other => {
            warn!("Unexpected credential view command '{}'", other);
            return Err(SocialError::bad_credentials());
        }
    }

    let raw: RawCredentials = match reply.message.map(serde_json::from_value) {
        Some(Ok(raw)) => raw,
        Some(Err(e)) => {
            warn!("Unreadable credentials from view: {}", e);
            return Err(SocialError::bad_credentials());
        }
        None => {
            warn!("Credential view answered 'auth' without credentials");
            return Err(SocialError::bad_credentials());
        }
    };

    let user_id = raw.user_id.trim().to_string();
    if !is_valid_nick(&user_id) {
        warn!("Rejecting '{}': not a valid IRC nickname", user_id);
        return Err(SocialError::bad_credentials());
    }

    let host = match raw.host.trim() {
        "" => options.host.clone().unwrap_or_default(),
        host => host.to_string(),
    };
    if host.is_empty() {
        warn!("No host in credentials or login options");
        return Err(SocialError::bad_credentials());
    }

    let port = match parse_port(&raw.port, default_port) {
        Some(port) => port,
        None => {
            warn!("Rejecting invalid port {}", raw.port);
            return Err(SocialError::bad_credentials());
        }
    };

    Ok(Credentials {
        user_id,
        host,
        port,
        room: raw.room.filter(|room| !room.trim().is_empty()),
    })
}

// Empty or absent ports fall back to the default; anything else must be 1..=65535
fn parse_port(value: &Value, default_port: u16) -> Option<u16> {
    match value {
        Value::Null => Some(default_port),
        Value::String(s) if s.trim().is_empty() => Some(default_port),
        Value::String(s) => s.trim().parse::<u16>().ok().filter(|port| *port != 0),
        Value::Number(n) => n
            .as_u64()
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port != 0),
        _ => None,
    }
}
