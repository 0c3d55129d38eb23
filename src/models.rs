use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence of a contact as seen by the outer application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactStatus {
    Online,             // Present and running this adapter
    OnlineWithOtherApp, // Present, but through some other client
    Offline,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub user_id: String,
    // IRC has no devices, so this mirrors user_id
    pub client_id: String,
    pub display_name: String,
    pub status: ContactStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl ContactRecord {
    pub fn new(user_id: &str) -> Self {
        ContactRecord {
            user_id: user_id.to_string(),
            client_id: user_id.to_string(),
            display_name: user_id.to_string(),
            status: ContactStatus::Unknown,
            last_seen: None,
            last_updated: Utc::now(),
        }
    }
}

/// A single message delivered to the outer application
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub from: ContactRecord,
    pub to: ContactRecord,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

/// Normalized events emitted towards the outer application
#[derive(Debug, Clone, PartialEq)]
pub enum SocialEvent {
    /// A contact (or this client) was discovered or changed presence
    ClientState(ContactRecord),
    Message(IncomingMessage),
}
