// Session connection lifecycle
// Login (credential view and transport connect), registration, disconnects and logout

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::messages::flush_batches;
use super::{Internal, OnlineLink, PendingLogin, Session, SessionActor};
use crate::config::{Credentials, LoginOptions};
use crate::directory::ContactPatch;
use crate::error::{ErrorCode, SocialError};
use crate::irc::{ConnectOptions, Line, TransportHandle};
use crate::models::{ContactRecord, ContactStatus, SocialEvent};
use crate::view::{resolve_credentials, ViewMessage};

impl SessionActor {
    pub(super) async fn login(&mut self, options: Option<LoginOptions>, reply: PendingLogin) {
        if let Some(options) = options {
            self.login_options = options;
        }

        if let Some(link) = self.online() {
            debug!("Already online as {}", link.self_id);
            let record = self
                .directory
                .get(&link.self_id)
                .cloned()
                .unwrap_or_else(|| ContactRecord::new(&link.self_id));
            let _ = reply.send(Ok(record));
            return;
        }

        // Only one attempt may be in flight
        self.abandon_attempt("Login superseded by a newer login").await;

        let attempt = self.next_attempt();
        match self.credentials.clone() {
            Some(credentials) => {
                info!("Reusing cached credentials for {}", credentials.user_id);
                self.start_connect(credentials, reply, attempt);
            }
            None => self.open_view(reply, attempt),
        }
    }

    fn open_view(&mut self, pending: PendingLogin, attempt: u64) {
        let mut view = self.views.open();
        let answer = view.show(&self.config.login_form);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let reply = answer.await.ok();
            let _ = internal.send(Internal::ViewReply { attempt, reply });
        });

        info!("Waiting for credentials from view '{}'", self.config.login_form);
        self.session = Session::AwaitingCredentials { view, pending };
    }

    pub(super) async fn on_view_reply(&mut self, reply: Option<ViewMessage>) {
        let (mut view, pending) = match std::mem::replace(&mut self.session, Session::NoCredentials) {
            Session::AwaitingCredentials { view, pending } => (view, pending),
            other => {
                warn!("Credential reply arrived while {}", other.name());
                self.session = other;
                return;
            }
        };
        view.close();

        match resolve_credentials(reply, &self.login_options, self.config.default_port) {
            Ok(credentials) => {
                self.credentials = Some(credentials.clone());
                let attempt = self.attempt;
                self.start_connect(credentials, pending, attempt);
            }
            Err(e) => {
                warn!("Login failed while reading credentials: {}", e);
                self.next_attempt();
                let _ = pending.send(Err(e));
            }
        }
    }

    fn start_connect(&mut self, credentials: Credentials, pending: PendingLogin, attempt: u64) {
        let options = ConnectOptions {
            nick: credentials.user_id.clone(),
            user: credentials.user_id.clone(),
            server: credentials.host.clone(),
            port: credentials.port,
            hostname: self.config.resolve_hostname(),
            realname: self.capability(),
            secure: false,
        };
        info!(
            "Connecting to {}:{} as {}",
            options.server, options.port, options.nick
        );

        let transport = self.transport.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let result = transport.connect(options, events_tx).await;
            let connected = result.is_ok();
            // Frames are forwarded only after the connect result, so they never overtake it
            if internal.send(Internal::Connected { attempt, result }).is_err() || !connected {
                return;
            }
            while let Some(event) = events_rx.recv().await {
                if internal.send(Internal::Transport { attempt, event }).is_err() {
                    break;
                }
            }
        });

        self.session = Session::Connecting {
            credentials,
            pending,
            link: None,
        };
    }

    pub(super) async fn on_connected(&mut self, result: anyhow::Result<Arc<dyn TransportHandle>>) {
        match result {
            Ok(handle) => match &mut self.session {
                Session::Connecting { link, .. } => {
                    debug!("Transport connected, waiting for registration");
                    *link = Some(handle);
                }
                other => {
                    warn!("Connection completed while {}; closing it", other.name());
                    disconnect_quietly(handle).await;
                }
            },
            Err(e) => {
                error!("Failed to connect: {:#}", e);
                self.fail_connect(SocialError::failed_connection(format!("{:#}", e)))
                    .await;
            }
        }
    }

    /// Connecting -> NoCredentials, completing the login with `error`
    async fn fail_connect(&mut self, error: SocialError) {
        match std::mem::replace(&mut self.session, Session::NoCredentials) {
            Session::Connecting { pending, link, .. } => {
                if let Some(handle) = link {
                    disconnect_quietly(handle).await;
                }
                self.credentials = None;
                self.next_attempt();
                let _ = pending.send(Err(error));
            }
            other => self.session = other,
        }
    }

    pub(super) async fn on_registered(&mut self, nick: String) {
        let (credentials, pending, handle) =
            match std::mem::replace(&mut self.session, Session::NoCredentials) {
                Session::Connecting {
                    credentials,
                    pending,
                    link: Some(handle),
                } => (credentials, pending, handle),
                other => {
                    warn!("Ignoring registration while {}", other.name());
                    self.session = other;
                    return;
                }
            };

        info!("Registered as {}", nick);
        self.directory.reset();
        self.batcher.clear();
        let record = self
            .directory
            .upsert(&nick, ContactPatch::sighting(ContactStatus::Online))
            .into_record();
        self.session = Session::Online(OnlineLink {
            handle: handle.clone(),
            self_id: nick,
        });
        self.emit(SocialEvent::ClientState(record.clone()));

        let room = credentials
            .room
            .or_else(|| self.login_options.room.clone())
            .filter(|room| !room.is_empty())
            .unwrap_or_else(|| self.config.default_channel.clone());
        match handle.join(&room).await {
            Ok(()) => info!("Joined {}", room),
            Err(e) => warn!("Failed to join {}: {:#}", room, e),
        }

        let _ = pending.send(Ok(record));
    }

    /// Only meaningful before registration; once online a refusal is followed by Closed
    pub(super) async fn on_registration_rejected(&mut self, errcode: ErrorCode, reason: String) {
        if !matches!(self.session, Session::Connecting { .. }) {
            debug!("Ignoring {} while {}: {}", errcode, self.session.name(), reason);
            return;
        }
        warn!("Server refused registration: {}", reason);
        self.fail_connect(SocialError::new(errcode, reason)).await;
    }

    pub(super) async fn on_closed(&mut self, reason: Option<String>) {
        let reason = reason.unwrap_or_else(|| "connection closed by server".to_string());
        let self_id = match &self.session {
            Session::Online(link) => link.self_id.clone(),
            Session::Connecting { .. } => {
                warn!("Connection closed before registration: {}", reason);
                return self.fail_connect(SocialError::failed_connection(reason)).await;
            }
            other => {
                debug!("Transport closed while {}", other.name());
                return;
            }
        };

        warn!("Lost connection: {}", reason);
        self.session = Session::Offline;
        self.next_attempt();
        let dropped = self.batcher.clear();
        if dropped > 0 {
            warn!("Dropped {} unsent messages", dropped);
        }
        let record = self
            .directory
            .upsert(&self_id, ContactPatch::status(ContactStatus::Offline))
            .into_record();
        self.emit(SocialEvent::ClientState(record));
    }

    /// Always completes; failures while saying goodbye are only logged
    pub(super) async fn logout(&mut self) {
        let previous = std::mem::replace(&mut self.session, Session::Offline);
        self.next_attempt();

        match previous {
            Session::Online(link) => {
                flush_batches(&link.handle, self.batcher.drain()).await;
                if let Err(e) = link.handle.send(Line::quit("Logged out")).await {
                    warn!("Failed to send QUIT: {:#}", e);
                }
                disconnect_quietly(link.handle).await;
            }
            Session::AwaitingCredentials { mut view, pending } => {
                view.close();
                let _ = pending.send(Err(SocialError::failed_connection("Login cancelled by logout")));
            }
            Session::Connecting { pending, link, .. } => {
                if let Some(handle) = link {
                    disconnect_quietly(handle).await;
                }
                let _ = pending.send(Err(SocialError::failed_connection("Login cancelled by logout")));
            }
            Session::NoCredentials | Session::Offline => {}
        }

        self.credentials = None;
        self.directory.reset();
        self.batcher.clear();
        info!("Logged out");
    }

    pub(super) fn clear_cached_credentials(&mut self) {
        if self.credentials.take().is_some() {
            info!("Cleared cached credentials");
        }
    }

    /// Tear down an in-flight login, completing its continuation with an error
    async fn abandon_attempt(&mut self, reason: &str) {
        match std::mem::replace(&mut self.session, Session::NoCredentials) {
            Session::AwaitingCredentials { mut view, pending } => {
                info!("Closing open credential view: {}", reason);
                view.close();
                let _ = pending.send(Err(SocialError::failed_connection(reason)));
            }
            Session::Connecting { pending, link, .. } => {
                info!("Abandoning connection attempt: {}", reason);
                if let Some(handle) = link {
                    disconnect_quietly(handle).await;
                }
                let _ = pending.send(Err(SocialError::failed_connection(reason)));
            }
            other => self.session = other,
        }
    }
}

pub(super) async fn disconnect_quietly(handle: Arc<dyn TransportHandle>) {
    if let Err(e) = handle.disconnect().await {
        warn!("Error while disconnecting: {:#}", e);
    }
}
