// src/connection/manager.rs
use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use futures::stream::StreamExt;
use log::{error, info};
use reqwest::Url;
use serde_json::Value;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
};

use super::subscription::SubscriptionId;
use super::transport::{HttpTransport, SseFrame, Transport, TransportError, TransportEvent};
use crate::bus::EventBus;
use crate::config::Settings;
use crate::envelope::Envelope;
use crate::retry::RelayBackoff;

/// Endpoint used when the caller does not name one.
pub const DEFAULT_ENDPOINT: &str = "/realtime/sse/";

type MessageCallback = Arc<dyn Fn(&Value) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;
type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Per-connection options. Callbacks default to no-ops.
#[derive(Clone)]
pub struct RelayOptions {
    pub endpoint: String,
    pub debug: bool,
    on_message: MessageCallback,
    on_error: ErrorCallback,
    on_connect: ConnectCallback,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            debug: false,
            on_message: Arc::new(|_| {}),
            on_error: Arc::new(|_| {}),
            on_connect: Arc::new(|| {}),
        }
    }
}

impl RelayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Enables verbose logging of every frame and dispatch.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Called with every parsed payload, after the notifications went out.
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_message = Arc::new(f);
        self
    }

    /// Called with every transport error, transient or not.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(f);
        self
    }

    /// Called when the server announces the stream with a `connected` event.
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Arc::new(f);
        self
    }
}

impl fmt::Debug for RelayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayOptions")
            .field("endpoint", &self.endpoint)
            .field("debug", &self.debug)
            .finish()
    }
}

/// Lifecycle of one logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// An error was reported and the transport is recovering by itself.
    Error,
    /// The transport closed; attempt number `attempt` starts after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    Closed,
}

/// Opens relayed connections and hands out the bus they publish on.
#[derive(Clone)]
pub struct Relay {
    bus: EventBus,
    transport: Arc<dyn Transport>,
    base_url: Url,
    backoff: RelayBackoff,
    reconnect: bool,
}

impl Relay {
    pub fn new(bus: EventBus, transport: Arc<dyn Transport>, base_url: Url) -> Self {
        Self {
            bus,
            transport,
            base_url,
            backoff: RelayBackoff::default(),
            reconnect: true,
        }
    }

    /// Build a relay over HTTP from the loaded settings.
    pub fn from_settings(settings: &Settings, bus: EventBus) -> Result<Self> {
        let base_url = Url::parse(&settings.relay.base_url)
            .with_context(|| format!("Invalid base url {}", settings.relay.base_url))?;
        let transport = HttpTransport::new(Duration::from_millis(settings.transport.retry_ms))
            .context("Failed to build HTTP client")?;

        Ok(Self::new(bus, Arc::new(transport), base_url)
            .with_backoff(RelayBackoff::from_settings(&settings.backoff))
            .with_reconnect(settings.relay.reconnect))
    }

    pub fn with_backoff(mut self, backoff: RelayBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// With reconnect off, a closed transport ends the connection.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(event_type, handler)
    }

    /// Resolve an endpoint against the base url. Absolute urls win.
    pub fn resolve(&self, endpoint: &str) -> Result<Url> {
        self.base_url
            .join(endpoint)
            .with_context(|| format!("Invalid endpoint {endpoint}"))
    }

    /// Open a connection and start relaying its frames onto the bus.
    ///
    /// Must be called from within a tokio runtime. Stream failures never come
    /// back through this call; they go to `on_error`.
    pub fn connect(&self, options: RelayOptions) -> Result<RelayConnection> {
        let url = self.resolve(&options.endpoint)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let worker = ConnectionWorker {
            url,
            options,
            bus: self.bus.clone(),
            transport: Arc::clone(&self.transport),
            backoff: self.backoff.clone(),
            reconnect: self.reconnect,
            state_tx,
        };
        let handle = tokio::spawn(worker.run(shutdown_rx));

        Ok(RelayConnection {
            state_rx,
            shutdown_tx,
            handle,
        })
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("base_url", &self.base_url.as_str())
            .field("backoff", &self.backoff)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Handle to a live connection.
///
/// Dropping it leaves the connection running; call [`RelayConnection::stop`]
/// to end it.
#[derive(Debug)]
pub struct RelayConnection {
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RelayConnection {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns `None` if the connection ended without ever matching.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<ConnectionState>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut state_rx = self.state_rx.clone();
        state_rx.wait_for(|state| predicate(state)).await.ok().map(|state| *state)
    }

    /// Close the stream and cancel any pending retry.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the connection task to end.
    pub async fn join(self) -> Result<()> {
        self.handle.await.context("Connection task failed")
    }
}

enum SessionOutcome {
    Shutdown,
    TransportClosed,
}

struct ConnectionWorker {
    url: Url,
    options: RelayOptions,
    bus: EventBus,
    transport: Arc<dyn Transport>,
    backoff: RelayBackoff,
    reconnect: bool,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionWorker {
    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Connecting to event stream at {}", self.url);

        loop {
            self.set_state(ConnectionState::Connecting);

            match self.run_session(&mut shutdown_rx).await {
                SessionOutcome::Shutdown => break,
                SessionOutcome::TransportClosed if !self.reconnect => {
                    info!("Event stream at {} closed", self.url);
                    break;
                }
                SessionOutcome::TransportClosed => {}
            }

            // `next_backoff` never gives up, retries only stop on shutdown
            let delay = self
                .backoff
                .next_backoff()
                .unwrap_or(self.backoff.max_interval);
            let attempt = self.backoff.retry_count();
            if self.options.debug {
                info!(
                    "Attempting to reconnect to {} in {} ms (attempt #{})",
                    self.url,
                    delay.as_millis(),
                    attempt
                );
            }
            self.set_state(ConnectionState::RetryScheduled { attempt, delay });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(_) = shutdown_rx.wait_for(|stopped| *stopped) => break,
            }
        }

        self.set_state(ConnectionState::Closed);
        info!("Connection to {} finished", self.url);
    }

    async fn run_session(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> SessionOutcome {
        let mut events = self.transport.open(&self.url);

        loop {
            tokio::select! {
                Ok(_) = shutdown_rx.wait_for(|stopped| *stopped) => {
                    info!("Stop requested for {}", self.url);
                    return SessionOutcome::Shutdown;
                }
                next = events.next() => {
                    match next {
                        Some(TransportEvent::Open) => {
                            self.set_state(ConnectionState::Open);
                        }
                        Some(TransportEvent::Message(frame)) => {
                            self.backoff.reset();
                            if *self.state_tx.borrow() != ConnectionState::Open {
                                self.set_state(ConnectionState::Open);
                            }
                            self.handle_frame(&frame);
                        }
                        Some(TransportEvent::Error(err)) => {
                            if self.report_error(&err) {
                                return SessionOutcome::TransportClosed;
                            }
                        }
                        None => {
                            self.report_error(&TransportError::Exhausted);
                            return SessionOutcome::TransportClosed;
                        }
                    }
                }
            }
        }
    }

    /// Log and forward a transport error. Returns true when it was terminal.
    fn report_error(&self, err: &TransportError) -> bool {
        error!("SSE error on {}: {}", self.url, err);
        self.set_state(ConnectionState::Error);
        self.guarded("on_error", || (self.options.on_error)(err));
        err.is_closed()
    }

    fn handle_frame(&self, frame: &SseFrame) {
        if self.options.debug {
            info!("Received: {}", frame.data);
        }
        if !frame.is_message() {
            if self.options.debug {
                info!("Ignoring named event {:?}", frame.event);
            }
            return;
        }

        let envelope = match Envelope::parse(&frame.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Error parsing message: {}", e);
                return;
            }
        };

        let detail = envelope.detail();
        let type_key = envelope.type_key();
        if self.options.debug {
            info!("Dispatching event: {} {}", type_key, detail);
        }
        self.bus.publish(&type_key, &detail);

        if let Some(id_key) = envelope.id_key() {
            if self.options.debug {
                info!("Also dispatching: {}", id_key);
            }
            self.bus.publish(&id_key, &detail);
        }

        self.guarded("on_message", || (self.options.on_message)(envelope.payload()));

        if envelope.is_connected() {
            self.guarded("on_connect", || (self.options.on_connect)());
        }
    }

    /// Run a user callback; a panic is logged and the stream keeps flowing.
    fn guarded(&self, name: &str, callback: impl FnOnce()) {
        if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            error!("{} callback panicked on {}", name, self.url);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}
