// IRC protocol plumbing for the social adapter
// Defines the transport seam the session drives, plus the line codec and event classifier

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod classify;
pub mod line;
pub mod tcp;

pub use classify::{classify, PresenceSignal, ProtocolEvent};
pub use line::{Line, MAX_LINE_LEN};
pub use tcp::TcpTransport;

// Numeric replies the classifier understands
pub mod numeric {
    pub const RPL_WELCOME: &str = "001";
    pub const RPL_NAMREPLY: &str = "353";
    pub const ERR_NONICKNAMEGIVEN: &str = "431";
    pub const ERR_ERRONEUSNICKNAME: &str = "432";
    pub const ERR_NICKNAMEINUSE: &str = "433";
    pub const ERR_NICKCOLLISION: &str = "436";
    pub const ERR_PASSWDMISMATCH: &str = "464";
    pub const ERR_YOUREBANNEDCREEP: &str = "465";
}

/// Options handed to `Transport::connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub nick: String,
    pub user: String,
    pub server: String,
    pub port: u16,
    pub hostname: String,
    /// Sent as the realname; peers running this adapter see it through extended-join
    pub realname: String,
    pub secure: bool,
}

/// Asynchronous events a live connection produces
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(Line),
    /// Connection ended, with the reason if one is known
    Closed(Option<String>),
}

/// Factory for connections. `connect` resolves once the socket is up; registration
/// completes later and is reported as a `001` frame on `events`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn TransportHandle>>;
}

/// One live connection
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send(&self, line: Line) -> Result<()>;
    async fn join(&self, channel: &str) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}
