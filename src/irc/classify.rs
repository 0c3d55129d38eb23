// Protocol event classification
// Maps each inbound IRC line onto the small set of events the session reacts to

use anyhow::{Context, Result};

use super::line::Line;
use super::numeric;
use crate::error::ErrorCode;
use crate::models::ContactStatus;

// Channel membership prefixes that may precede a nick in a NAMES reply
const MEMBERSHIP_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceSignal {
    Unavailable,
    /// Present; `capability` is the advertised marker when the server reports one
    Available { capability: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Registration finished; `nick` is the identity the server assigned
    Registered { nick: String },
    NameList { channel: String, nicks: Vec<String> },
    Presence { nick: String, signal: PresenceSignal },
    DirectMessage { from: String, to: String, body: String },
    /// The server refused us; `errcode` is what a pending login fails with
    RegistrationRejected { errcode: ErrorCode, reason: String },
    Unrecognized { command: String },
}

/// Classify one inbound line
pub fn classify(line: &Line) -> ProtocolEvent {
    let unrecognized = || ProtocolEvent::Unrecognized {
        command: line.command.clone(),
    };

    match line.command.as_str() {
        numeric::RPL_WELCOME => match line.param(0) {
            Some(nick) if !nick.is_empty() => ProtocolEvent::Registered {
                nick: nick.to_string(),
            },
            _ => unrecognized(),
        },
        // <me> <symbol> <channel> :<nicks>
        numeric::RPL_NAMREPLY => match (line.param(2), line.param(3)) {
            (Some(channel), Some(names)) => ProtocolEvent::NameList {
                channel: channel.to_string(),
                nicks: names
                    .split(' ')
                    .map(|name| name.trim_start_matches(MEMBERSHIP_PREFIXES))
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            },
            _ => unrecognized(),
        },
        numeric::ERR_NONICKNAMEGIVEN
        | numeric::ERR_ERRONEUSNICKNAME
        | numeric::ERR_NICKNAMEINUSE
        | numeric::ERR_NICKCOLLISION
        | numeric::ERR_PASSWDMISMATCH => ProtocolEvent::RegistrationRejected {
            errcode: ErrorCode::LoginBadCredentials,
            reason: rejection_reason(line),
        },
        numeric::ERR_YOUREBANNEDCREEP | "ERROR" => ProtocolEvent::RegistrationRejected {
            errcode: ErrorCode::LoginFailedConnection,
            reason: rejection_reason(line),
        },
        // extended-join: JOIN <channel> <account> :<realname>
        "JOIN" => match line.source_nick() {
            Some(nick) => ProtocolEvent::Presence {
                nick: nick.to_string(),
                signal: PresenceSignal::Available {
                    capability: line.param(2).map(str::to_string),
                },
            },
            None => unrecognized(),
        },
        "PART" | "QUIT" => match line.source_nick() {
            Some(nick) => ProtocolEvent::Presence {
                nick: nick.to_string(),
                signal: PresenceSignal::Unavailable,
            },
            None => unrecognized(),
        },
        "PRIVMSG" => match (line.source_nick(), line.param(0), line.param(1)) {
            (Some(from), Some(to), Some(body)) => ProtocolEvent::DirectMessage {
                from: from.to_string(),
                to: to.to_string(),
                body: body.to_string(),
            },
            _ => unrecognized(),
        },
        _ => unrecognized(),
    }
}

// Numeric replies end with a human readable text; ERROR carries only that
fn rejection_reason(line: &Line) -> String {
    match line.params.last() {
        Some(text) if !text.is_empty() => format!("{} {}", line.command, text),
        _ => line.command.clone(),
    }
}

/// Status for a presence signal, given the capability this adapter advertises
pub fn presence_status(signal: &PresenceSignal, advertised: &str) -> ContactStatus {
    match signal {
        PresenceSignal::Unavailable => ContactStatus::Offline,
        PresenceSignal::Available {
            capability: Some(capability),
        } if capability == advertised => ContactStatus::Online,
        PresenceSignal::Available { .. } => ContactStatus::OnlineWithOtherApp,
    }
}

/// Split a received body back into the individually sent payloads
pub fn decode_batch(body: &str) -> Result<Vec<String>> {
    serde_json::from_str(body).context("Message body is not a JSON array of strings")
}
