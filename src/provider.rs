// IRC social provider
// The command surface the outer application talks to. Every call is forwarded to the
// session task and completes exactly once with a value or a `SocialError`.

use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::{AdapterConfig, LoginOptions};
use crate::error::{SocialError, SocialResult};
use crate::irc::Transport;
use crate::models::{ContactRecord, SocialEvent};
use crate::session::{Command, SessionActor};
use crate::view::CredentialViewProvider;

/// Cloneable handle to one adapter instance
#[derive(Clone)]
pub struct IrcSocialProvider {
    commands: mpsc::Sender<Command>,
}

impl IrcSocialProvider {
    /// Start the session task. Normalized events arrive on the returned receiver.
    /// The task stops (logging out) once every clone of the provider is dropped.
    pub fn spawn(
        config: AdapterConfig,
        transport: Arc<dyn Transport>,
        views: Arc<dyn CredentialViewProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<SocialEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(100);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!("Starting IRC social provider (capability {})", config.capability);
        let actor = SessionActor::new(config, transport, views, events_tx);
        tokio::spawn(actor.run(commands_rx));

        (
            Self {
                commands: commands_tx,
            },
            events_rx,
        )
    }

    /// Log in, prompting for credentials unless some are cached.
    /// `None` reuses the options from the previous call.
    pub async fn login(&self, options: Option<LoginOptions>) -> SocialResult<ContactRecord> {
        self.request(|reply| Command::Login { options, reply }).await
    }

    /// Always succeeds; goodbye failures are swallowed
    pub async fn logout(&self) -> SocialResult<()> {
        self.request(|reply| Command::Logout { reply }).await
    }

    pub async fn send_message(&self, to: &str, payload: impl Into<String>) -> SocialResult<()> {
        let to = to.to_string();
        let payload = payload.into();
        self.request(|reply| Command::SendMessage { to, payload, reply })
            .await
    }

    pub async fn get_contacts(&self) -> SocialResult<HashMap<String, ContactRecord>> {
        self.request(|reply| Command::GetContacts { reply }).await
    }

    pub async fn get_users(&self) -> SocialResult<HashMap<String, ContactRecord>> {
        self.get_contacts().await
    }

    /// Every identity is its own client on IRC, so this is the same directory
    pub async fn get_clients(&self) -> SocialResult<HashMap<String, ContactRecord>> {
        self.get_contacts().await
    }

    /// Forget stored credentials without touching the connection
    pub async fn clear_cached_credentials(&self) -> SocialResult<()> {
        self.request(|reply| Command::ClearCachedCredentials { reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<SocialResult<T>>) -> Command,
    ) -> SocialResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| SocialError::unknown("Session task is not running"))?;
        reply_rx
            .await
            .unwrap_or_else(|_| Err(SocialError::unknown("Session task dropped the request")))
    }
}
