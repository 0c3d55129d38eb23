// Session state machine
// A single task owns the session state, the contact directory and the outbound batcher.
// Commands from the provider, credential view replies, connect results and transport
// events are all funnelled into that task and handled one at a time.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::batcher::OutboundBatcher;
use crate::config::{AdapterConfig, Credentials, LoginOptions};
use crate::directory::ContactDirectory;
use crate::error::SocialResult;
use crate::irc::{classify, ProtocolEvent, Transport, TransportEvent, TransportHandle};
use crate::models::{ContactRecord, SocialEvent};
use crate::view::{CredentialView, CredentialViewProvider, ViewMessage};
use connection::disconnect_quietly;

mod connection;
mod messages;
mod roster;

/// Completion for a pending login
type PendingLogin = oneshot::Sender<SocialResult<ContactRecord>>;

/// Requests from the provider; each carries the channel its result goes back on
pub(crate) enum Command {
    Login {
        options: Option<LoginOptions>,
        reply: PendingLogin,
    },
    Logout {
        reply: oneshot::Sender<SocialResult<()>>,
    },
    SendMessage {
        to: String,
        payload: String,
        reply: oneshot::Sender<SocialResult<()>>,
    },
    GetContacts {
        reply: oneshot::Sender<SocialResult<HashMap<String, ContactRecord>>>,
    },
    ClearCachedCredentials {
        reply: oneshot::Sender<SocialResult<()>>,
    },
}

/// Completions of work started by the session, tagged with the attempt that started it
enum Internal {
    ViewReply {
        attempt: u64,
        reply: Option<ViewMessage>,
    },
    Connected {
        attempt: u64,
        result: anyhow::Result<Arc<dyn TransportHandle>>,
    },
    Transport {
        attempt: u64,
        event: TransportEvent,
    },
}

impl Internal {
    fn attempt(&self) -> u64 {
        match self {
            Internal::ViewReply { attempt, .. }
            | Internal::Connected { attempt, .. }
            | Internal::Transport { attempt, .. } => *attempt,
        }
    }
}

/// The live connection. Only reachable through `Session::Online`, so nothing can be
/// sent on the wire from any other state.
struct OnlineLink {
    handle: Arc<dyn TransportHandle>,
    self_id: String,
}

enum Session {
    NoCredentials,
    AwaitingCredentials {
        view: Box<dyn CredentialView>,
        pending: PendingLogin,
    },
    /// Socket being opened (`link` is None) or open and waiting for registration
    Connecting {
        credentials: Credentials,
        pending: PendingLogin,
        link: Option<Arc<dyn TransportHandle>>,
    },
    Online(OnlineLink),
    Offline,
}

impl Session {
    fn name(&self) -> &'static str {
        match self {
            Session::NoCredentials => "NoCredentials",
            Session::AwaitingCredentials { .. } => "AwaitingCredentials",
            Session::Connecting { .. } => "Connecting",
            Session::Online(_) => "Online",
            Session::Offline => "Offline",
        }
    }
}

pub(crate) struct SessionActor {
    session: Session,
    credentials: Option<Credentials>,
    login_options: LoginOptions,
    directory: ContactDirectory,
    batcher: OutboundBatcher,
    config: AdapterConfig,
    transport: Arc<dyn Transport>,
    views: Arc<dyn CredentialViewProvider>,
    events: mpsc::UnboundedSender<SocialEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    // Bumped whenever an attempt starts or is torn down; older completions are ignored
    attempt: u64,
}

impl SessionActor {
    pub(crate) fn new(
        config: AdapterConfig,
        transport: Arc<dyn Transport>,
        views: Arc<dyn CredentialViewProvider>,
        events: mpsc::UnboundedSender<SocialEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            session: Session::NoCredentials,
            credentials: None,
            login_options: LoginOptions::default(),
            directory: ContactDirectory::new(),
            batcher: OutboundBatcher::new(config.batch_policy()),
            config,
            transport,
            views,
            events,
            internal_tx,
            internal_rx,
            attempt: 0,
        }
    }

    /// Main loop; returns once every provider handle has been dropped
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.batcher.next_deadline();
            tokio::select! {
                biased;
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
                _ = wait_until(deadline) => self.flush_due().await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        info!("Provider dropped, shutting down session");
        self.logout().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Login { options, reply } => self.login(options, reply).await,
            Command::Logout { reply } => {
                self.logout().await;
                let _ = reply.send(Ok(()));
            }
            Command::SendMessage { to, payload, reply } => {
                let _ = reply.send(self.send_message(&to, payload));
            }
            Command::GetContacts { reply } => {
                let _ = reply.send(Ok(self.directory.all()));
            }
            Command::ClearCachedCredentials { reply } => {
                self.clear_cached_credentials();
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        if internal.attempt() != self.attempt {
            debug!(
                "Ignoring completion from superseded attempt {} (current {})",
                internal.attempt(),
                self.attempt
            );
            if let Internal::Connected {
                result: Ok(handle), ..
            } = internal
            {
                info!("Closing connection opened by an abandoned login");
                disconnect_quietly(handle).await;
            }
            return;
        }

        match internal {
            Internal::ViewReply { reply, .. } => self.on_view_reply(reply).await,
            Internal::Connected { result, .. } => self.on_connected(result).await,
            Internal::Transport {
                event: TransportEvent::Closed(reason),
                ..
            } => self.on_closed(reason).await,
            Internal::Transport {
                event: TransportEvent::Frame(line),
                ..
            } => match classify(&line) {
                ProtocolEvent::Registered { nick } => self.on_registered(nick).await,
                ProtocolEvent::NameList { channel, nicks } => self.on_name_list(&channel, nicks),
                ProtocolEvent::Presence { nick, signal } => self.on_presence(&nick, &signal),
                ProtocolEvent::DirectMessage { from, to, body } => {
                    self.on_direct_message(&from, &to, &body)
                }
                ProtocolEvent::RegistrationRejected { errcode, reason } => {
                    self.on_registration_rejected(errcode, reason).await
                }
                ProtocolEvent::Unrecognized { command } => {
                    warn!("Dropped unrecognized {} frame: {}", command, line)
                }
            },
        }
    }

    fn online(&self) -> Option<&OnlineLink> {
        match &self.session {
            Session::Online(link) => Some(link),
            _ => None,
        }
    }

    /// Capability marker this adapter advertises
    fn capability(&self) -> String {
        self.login_options
            .capability
            .clone()
            .filter(|capability| !capability.is_empty())
            .unwrap_or_else(|| self.config.capability.clone())
    }

    fn emit(&self, event: SocialEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped; discarding event");
        }
    }

    fn next_attempt(&mut self) -> u64 {
        self.attempt += 1;
        self.attempt
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
