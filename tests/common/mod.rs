// Common test utilities for integration tests
// A scripted transport and credential view so the session can be driven without a server

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::LevelFilter;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;

use ircsocial::irc::{ConnectOptions, Line, Transport, TransportEvent, TransportHandle};
use ircsocial::view::{CredentialView, CredentialViewProvider, ViewMessage};
use ircsocial::{AdapterConfig, IrcSocialProvider, SocialEvent};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Let every spawned task run until the runtime is idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Default)]
struct WireState {
    connects: Vec<ConnectOptions>,
    sent: Vec<(Instant, Line)>,
    joins: Vec<String>,
    disconnects: usize,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
}

/// In-memory transport recording everything the session puts on the wire
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<WireState>>,
    refuse_connect: Arc<AtomicBool>,
    fail_goodbye: Arc<AtomicBool>,
    hold_registration: Arc<AtomicBool>,
    connect_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following connect fail
    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Make QUIT and disconnect fail
    pub fn fail_goodbye(&self, fail: bool) {
        self.fail_goodbye.store(fail, Ordering::SeqCst);
    }

    /// Skip the automatic welcome after connect
    pub fn hold_registration(&self, hold: bool) {
        self.hold_registration.store(hold, Ordering::SeqCst);
    }

    /// Hold every following connect until the returned gate is notified
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Deliver a raw line from the server
    pub fn emit(&self, raw: &str) {
        let line = Line::parse(raw).expect("test line parses");
        let state = self.state.lock().unwrap();
        let events = state.events.as_ref().expect("no live connection");
        events.send(TransportEvent::Frame(line)).expect("session stopped listening");
    }

    /// Simulate the server dropping the connection
    pub fn drop_connection(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(events) = state.events.take() {
            let _ = events.send(TransportEvent::Closed(Some(reason.to_string())));
        }
    }

    pub fn connects(&self) -> Vec<ConnectOptions> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn sent(&self) -> Vec<(Instant, Line)> {
        self.state.lock().unwrap().sent.clone()
    }

    /// PRIVMSGs as (sent at, target, decoded payloads)
    pub fn privmsgs(&self) -> Vec<(Instant, String, Vec<String>)> {
        self.sent()
            .into_iter()
            .filter(|(_, line)| line.command == "PRIVMSG")
            .map(|(at, line)| {
                let payloads: Vec<String> =
                    serde_json::from_str(&line.params[1]).expect("batch body is a JSON array");
                (at, line.params[0].clone(), payloads)
            })
            .collect()
    }

    pub fn joins(&self) -> Vec<String> {
        self.state.lock().unwrap().joins.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn TransportHandle>> {
        let gate = self.connect_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        state.connects.push(options.clone());
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused by {}:{}", options.server, options.port));
        }

        if !self.hold_registration.load(Ordering::SeqCst) {
            let welcome = format!(":irc.test 001 {} :Welcome to the test network", options.nick);
            let _ = events.send(TransportEvent::Frame(Line::parse(&welcome)?));
        }
        state.events = Some(events);

        Ok(Arc::new(MockHandle {
            state: self.state.clone(),
            fail_goodbye: self.fail_goodbye.clone(),
        }))
    }
}

struct MockHandle {
    state: Arc<Mutex<WireState>>,
    fail_goodbye: Arc<AtomicBool>,
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn send(&self, line: Line) -> Result<()> {
        if line.command == "QUIT" && self.fail_goodbye.load(Ordering::SeqCst) {
            return Err(anyhow!("broken pipe"));
        }
        self.state.lock().unwrap().sent.push((Instant::now(), line));
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<()> {
        self.state.lock().unwrap().joins.push(channel.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.events = None;
        if self.fail_goodbye.load(Ordering::SeqCst) {
            return Err(anyhow!("socket already closed"));
        }
        Ok(())
    }
}

/// How the next opened view answers
pub enum ViewScript {
    Reply(ViewMessage),
    /// Keep the answer back until `ScriptedViews::release` is called
    Hold,
    /// Go away without answering
    Cancel,
}

#[derive(Default)]
struct ViewState {
    script: Mutex<VecDeque<ViewScript>>,
    held: Mutex<VecDeque<oneshot::Sender<ViewMessage>>>,
    forms: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct ScriptedViews {
    state: Arc<ViewState>,
}

impl ScriptedViews {
    pub fn new(script: Vec<ViewScript>) -> Self {
        let views = Self::default();
        views.state.script.lock().unwrap().extend(script);
        views
    }

    pub fn push(&self, answer: ViewScript) {
        self.state.script.lock().unwrap().push_back(answer);
    }

    /// Answer the oldest held view; false if it was already dropped
    pub fn release(&self, answer: ViewMessage) -> bool {
        match self.state.held.lock().unwrap().pop_front() {
            Some(sender) => sender.send(answer).is_ok(),
            None => false,
        }
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn forms(&self) -> Vec<String> {
        self.state.forms.lock().unwrap().clone()
    }
}

impl CredentialViewProvider for ScriptedViews {
    fn open(&self) -> Box<dyn CredentialView> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedView {
            state: self.state.clone(),
        })
    }
}

struct ScriptedView {
    state: Arc<ViewState>,
}

impl CredentialView for ScriptedView {
    fn show(&mut self, form_id: &str) -> oneshot::Receiver<ViewMessage> {
        self.state.forms.lock().unwrap().push(form_id.to_string());
        let (answer_tx, answer_rx) = oneshot::channel();
        let next = self.state.script.lock().unwrap().pop_front();
        match next {
            Some(ViewScript::Reply(answer)) => {
                let _ = answer_tx.send(answer);
            }
            Some(ViewScript::Hold) => self.state.held.lock().unwrap().push_back(answer_tx),
            Some(ViewScript::Cancel) | None => drop(answer_tx),
        }
        answer_rx
    }

    fn close(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A provider wired to the mocks
pub struct Harness {
    pub provider: IrcSocialProvider,
    pub events: mpsc::UnboundedReceiver<SocialEvent>,
    pub transport: MockTransport,
    pub views: ScriptedViews,
}

impl Harness {
    pub fn new(script: Vec<ViewScript>) -> Self {
        Self::with_config(test_config(), script)
    }

    pub fn with_config(config: AdapterConfig, script: Vec<ViewScript>) -> Self {
        setup_logging();
        let transport = MockTransport::new();
        let views = ScriptedViews::new(script);
        let (provider, events) =
            IrcSocialProvider::spawn(config, Arc::new(transport.clone()), Arc::new(views.clone()));
        Harness {
            provider,
            events,
            transport,
            views,
        }
    }

    /// Events emitted so far
    pub fn drain_events(&mut self) -> Vec<SocialEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn test_config() -> AdapterConfig {
    AdapterConfig {
        hostname: Some("testhost".to_string()),
        ..Default::default()
    }
}

/// Credentials for `nick` on the test server, port left to the default
pub fn auth(nick: &str) -> ViewScript {
    ViewScript::Reply(ViewMessage::auth(nick, "irc.example.org", ""))
}
