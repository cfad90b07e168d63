//! Event Socket client
//!
//! Owns the single connection to FreeSWITCH. Commands are written under the
//! connection lock, which also enqueues a reply slot; a reader task completes
//! the slots in order, since the server answers commands on one socket in the
//! order they were sent. Events are decoded by the same reader task and
//! published on a broadcast channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::EslCodec;
use super::message::{CORE_UUID, ContentType, EslEvent, EslMessage};
use super::restart::{RestartDetector, RestartSignal};
use super::state::ConnectionState;
use crate::config::EslConfig;
use crate::config::defaults::DEFAULT_ESL_PASSWORD;
use crate::errors::{EslError, EslResult};

/// Event classes the client listens to. Heartbeats and API events are what
/// restart detection needs; nothing else is consumed.
pub const EVENT_SUBSCRIPTION: &str = "event plain HEARTBEAT API";

const STATUS_COMMAND: &str = "status";
const SIGNAL_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 256;

type EslSink = SplitSink<Framed<TcpStream, EslCodec>, String>;
type EslStream = SplitStream<Framed<TcpStream, EslCodec>>;

/// Why the connection was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// Socket or framing failure
    TransportError,
    /// The server announced it is closing the connection
    DisconnectNotice,
    /// The server closed the socket
    StreamEnded,
}

struct PendingReply {
    command: String,
    reply: oneshot::Sender<EslResult<EslMessage>>,
}

type PendingQueue = Arc<Mutex<VecDeque<PendingReply>>>;

struct Connection {
    sink: EslSink,
    pending: PendingQueue,
    cancel: CancellationToken,
    generation: u64,
}

struct ClientInner {
    host: String,
    port: u16,
    password: String,
    connect_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    connection: Mutex<Option<Connection>>,
    generation: AtomicU64,
    events: broadcast::Sender<EslEvent>,
    signals: broadcast::Sender<ConnectionSignal>,
    restart: RestartDetector,
    shutdown: std::sync::Mutex<CancellationToken>,
}

/// Handle to the Event Socket connection. Cheap to clone.
#[derive(Clone)]
pub struct EslClient {
    inner: Arc<ClientInner>,
}

impl EslClient {
    pub fn new(config: &EslConfig) -> EslResult<Self> {
        if config.host.trim().is_empty() {
            return Err(EslError::invalid_config("host", "Missing ESL host"));
        }
        if config.port == 0 {
            return Err(EslError::invalid_config("port", "Missing ESL port"));
        }
        if config.password == DEFAULT_ESL_PASSWORD {
            warn!("Using default password for ESL connection");
        }
        let connect_timeout = config
            .connect_timeout()
            .map_err(|e| EslError::invalid_config("connect_timeout", e.to_string()))?;

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);

        Ok(Self {
            inner: Arc::new(ClientInner {
                host: config.host.clone(),
                port: config.port,
                password: config.password.clone(),
                connect_timeout,
                state,
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                events,
                signals,
                restart: RestartDetector::new(),
                shutdown: std::sync::Mutex::new(CancellationToken::new()),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Follow state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive every event pushed by the server after subscription
    pub fn subscribe_events(&self) -> broadcast::Receiver<EslEvent> {
        self.inner.events.subscribe()
    }

    /// Receive a signal whenever the connection is lost unexpectedly
    pub fn connection_signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.inner.signals.subscribe()
    }

    /// Receive a signal whenever FreeSWITCH restarted behind the connection
    pub fn restart_signals(&self) -> broadcast::Receiver<RestartSignal> {
        self.inner.restart.subscribe()
    }

    pub fn restart_detector(&self) -> &RestartDetector {
        &self.inner.restart
    }

    /// Token cancelled by [`EslClient::stop`]; background work tied to this
    /// client stops with it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.lock_shutdown().clone()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.inner.host, self.inner.port)
    }

    fn lock_shutdown(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.inner
            .shutdown
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let mut applied = false;
        self.inner.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!(from = %current, to = %next, "ESL connection state change");
                *current = next;
                applied = true;
            }
            applied
        });
        applied
    }

    /// Enter the reconnecting state, if the current state allows it
    pub fn mark_reconnecting(&self) {
        self.transition(ConnectionState::Reconnecting);
    }

    /// Start the client: connect, authenticate and subscribe, bounded by the
    /// configured connect timeout.
    pub async fn start(&self) -> EslResult<()> {
        self.start_with_timeout(self.inner.connect_timeout).await
    }

    /// Like [`EslClient::start`] with an explicit bound.
    ///
    /// A transport failure does not end startup: it is reported as a
    /// [`ConnectionSignal`] and startup keeps waiting for a reconnection to
    /// reach [`ConnectionState::Subscribed`] until the timeout elapses.
    pub async fn start_with_timeout(&self, timeout: Duration) -> EslResult<()> {
        let mut state = self.watch_state();

        let establish = async {
            match self.connect().await {
                Ok(()) => self.subscribe().await?,
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => warn!(error = %e, "Initial ESL connection failed, waiting for reconnection"),
            }
            state
                .wait_for(|s| *s == ConnectionState::Subscribed)
                .await
                .map(|_| ())
                .map_err(|_| EslError::protocol("connection state channel closed"))
        };

        match tokio::time::timeout(timeout, establish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Error when starting ESL interface");
                self.stop().await;
                Err(e)
            }
            Err(_) => {
                error!(timeout = ?timeout, "Failed to connect to ESL");
                self.stop().await;
                Err(EslError::ConnectionTimeout { timeout })
            }
        }
    }

    /// Open the transport and authenticate.
    ///
    /// A retryable failure is also published as
    /// [`ConnectionSignal::TransportError`] so the supervisor can take over.
    pub async fn connect(&self) -> EslResult<()> {
        let origin = self.state();
        if origin.accepts_commands() {
            return Ok(());
        }
        if !self.transition(ConnectionState::Connecting) {
            return Err(EslError::protocol(format!(
                "cannot start a connection attempt while {origin}"
            )));
        }

        match self.open().await {
            Ok((sink, stream)) => {
                self.install(sink, stream).await;
                self.transition(ConnectionState::Connected);
                info!(address = %self.address(), "Connected to FreeSWITCH ESL");
                Ok(())
            }
            Err(e) => {
                let fallback = if origin == ConnectionState::Reconnecting {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Disconnected
                };
                self.transition(fallback);
                if e.is_retryable() {
                    let _ = self.inner.signals.send(ConnectionSignal::TransportError);
                }
                Err(e)
            }
        }
    }

    async fn open(&self) -> EslResult<(EslSink, EslStream)> {
        let address = self.address();
        info!(host = %self.inner.host, port = self.inner.port, "Connecting to ESL server");

        let stream = TcpStream::connect(&address).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY, continuing with default buffering");
        }
        let mut framed = Framed::new(stream, EslCodec::new());

        let greeting = next_frame(&mut framed).await?;
        if greeting.content_type() != ContentType::AuthRequest {
            return Err(EslError::protocol(format!(
                "expected auth/request greeting, got {:?}",
                greeting.header(super::message::CONTENT_TYPE)
            )));
        }

        framed.send(format!("auth {}", self.inner.password)).await?;
        let reply = next_frame(&mut framed).await?;
        if reply.is_error() || !reply.reply_text().starts_with("+OK") {
            error!(address = %address, "FSESL connection authentication error (wrong password?)");
            return Err(EslError::Auth {
                addr: address,
                reply: reply.reply_text().to_string(),
            });
        }

        Ok(framed.split())
    }

    async fn install(&self, sink: EslSink, stream: EslStream) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = self.shutdown_token().child_token();
        let pending = PendingQueue::default();

        {
            let mut slot = self.inner.connection.lock().await;
            *slot = Some(Connection {
                sink,
                pending: Arc::clone(&pending),
                cancel: cancel.clone(),
                generation,
            });
        }

        let client = self.clone();
        tokio::spawn(async move {
            client.read_loop(stream, pending, cancel, generation).await;
        });
    }

    /// Subscribe to the events restart detection needs, then probe `status`
    pub async fn subscribe(&self) -> EslResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(EslError::not_connected(EVENT_SUBSCRIPTION));
        }

        let reply = self.request(EVENT_SUBSCRIPTION.to_string()).await?;
        if reply.is_error() {
            return Err(EslError::Command {
                command: EVENT_SUBSCRIPTION.to_string(),
                reply: reply.reply_text().to_string(),
            });
        }

        self.transition(ConnectionState::Subscribed);
        info!("Subscribed to FreeSWITCH events");
        self.spawn_status_probe();
        Ok(())
    }

    fn spawn_status_probe(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            match client.execute_command(STATUS_COMMAND).await {
                Ok(reply) => {
                    if let Some(core_uuid) = reply.header(CORE_UUID) {
                        client.inner.restart.observe(core_uuid);
                    }
                }
                Err(e) => error!(error = %e, "Error when getting FreeSWITCH status"),
            }
        });
    }

    /// Run an API command and return its reply.
    ///
    /// Safe to call concurrently. Fails without touching the socket when the
    /// client is not connected.
    pub async fn execute_command(&self, command: &str) -> EslResult<EslMessage> {
        if !self.state().accepts_commands() {
            error!(command, "FSESL client is disconnected, unable to execute command");
            return Err(EslError::not_connected(command));
        }

        debug!(command, "FSESL sending command");
        let reply = self.request(format!("api {command}")).await?;
        debug!(command, body = reply.body(), "FSESL command response");

        if reply.is_error() {
            return Err(EslError::Command {
                command: command.to_string(),
                reply: reply.reply_text().trim().to_string(),
            });
        }
        Ok(reply)
    }

    async fn request(&self, frame: String) -> EslResult<EslMessage> {
        let (tx, rx) = oneshot::channel();

        let failed_generation = {
            let mut slot = self.inner.connection.lock().await;
            let Some(connection) = slot.as_mut() else {
                return Err(EslError::not_connected(frame));
            };

            connection.pending.lock().await.push_back(PendingReply {
                command: frame.clone(),
                reply: tx,
            });

            match connection.sink.send(frame.clone()).await {
                Ok(()) => None,
                Err(e) => {
                    connection.pending.lock().await.pop_back();
                    match e {
                        EslError::Transport(io) => {
                            warn!(error = %io, "FSESL write failed");
                            Some(connection.generation)
                        }
                        other => return Err(other),
                    }
                }
            }
        };

        if let Some(generation) = failed_generation {
            self.on_connection_lost(generation, ConnectionSignal::TransportError)
                .await;
            return Err(EslError::not_connected(frame));
        }

        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(EslError::not_connected(frame)),
        }
    }

    async fn read_loop(
        self,
        mut stream: EslStream,
        pending: PendingQueue,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let signal = loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break None,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(message)) => {
                    if let Some(signal) = self.dispatch(message, &pending).await {
                        break Some(signal);
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "FSESL connection received error");
                    break Some(ConnectionSignal::TransportError);
                }
                None => break Some(ConnectionSignal::StreamEnded),
            }
        };

        for waiting in pending.lock().await.drain(..) {
            let _ = waiting
                .reply
                .send(Err(EslError::not_connected(waiting.command)));
        }

        if let Some(signal) = signal
            && !cancel.is_cancelled()
        {
            self.on_connection_lost(generation, signal).await;
        }
    }

    async fn dispatch(&self, message: EslMessage, pending: &PendingQueue) -> Option<ConnectionSignal> {
        match message.content_type() {
            ContentType::CommandReply | ContentType::ApiResponse => {
                match pending.lock().await.pop_front() {
                    Some(waiting) => {
                        let _ = waiting.reply.send(Ok(message));
                    }
                    None => warn!("Received an ESL reply nobody is waiting for"),
                }
            }
            ContentType::EventPlain => {
                if let Some(event) = message.into_event() {
                    self.inner.restart.observe_event(&event);
                    let _ = self.inner.events.send(event);
                }
            }
            ContentType::DisconnectNotice => {
                warn!("FSESL received disconnect notice");
                return Some(ConnectionSignal::DisconnectNotice);
            }
            ContentType::AuthRequest | ContentType::Other => {
                debug!(headers = ?message.headers(), "Ignoring unexpected ESL frame");
            }
        }
        None
    }

    async fn on_connection_lost(&self, generation: u64, signal: ConnectionSignal) {
        {
            let mut slot = self.inner.connection.lock().await;
            if slot.as_ref().map(|c| c.generation) != Some(generation) {
                return;
            }
            if let Some(connection) = slot.take() {
                connection.cancel.cancel();
            }
        }

        error!(reason = ?signal, "FSESL connection dropped unexpectedly");
        self.transition(ConnectionState::Disconnected);
        let _ = self.inner.signals.send(signal);
    }

    /// Drop the current socket without touching the lifecycle state.
    ///
    /// Pending commands fail with [`EslError::NotConnected`].
    pub async fn close_transport(&self) {
        let connection = self.inner.connection.lock().await.take();
        if let Some(mut connection) = connection {
            connection.cancel.cancel();
            if let Err(e) = connection.sink.close().await {
                debug!(error = %e, "Error closing ESL socket");
            }
        }
    }

    /// Tear down the transport and every background task tied to it.
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        {
            let mut shutdown = self.lock_shutdown();
            shutdown.cancel();
            *shutdown = CancellationToken::new();
        }
        self.close_transport().await;
        self.transition(ConnectionState::Disconnected);
    }

    /// One reconnection attempt: drop the old socket, connect, resubscribe
    pub async fn reconnect(&self) -> EslResult<()> {
        self.close_transport().await;
        self.mark_reconnecting();
        self.connect().await?;
        self.subscribe().await
    }
}

async fn next_frame(framed: &mut Framed<TcpStream, EslCodec>) -> EslResult<EslMessage> {
    match framed.next().await {
        Some(frame) => frame,
        None => Err(EslError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed during handshake",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn config() -> EslConfig {
        EslConfig {
            host: "127.0.0.1".to_string(),
            // Nothing listens here; any attempt to connect would fail.
            port: 1,
            password: "secret".to_string(),
            ..EslConfig::default()
        }
    }

    #[test]
    fn test_rejects_missing_host() {
        let config = EslConfig {
            host: " ".to_string(),
            ..config()
        };
        assert!(matches!(
            EslClient::new(&config),
            Err(EslError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_port() {
        let config = EslConfig { port: 0, ..config() };
        assert!(matches!(
            EslClient::new(&config),
            Err(EslError::InvalidConfig { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_warns_on_default_password() {
        let config = EslConfig {
            password: DEFAULT_ESL_PASSWORD.to_string(),
            ..config()
        };
        EslClient::new(&config).unwrap();
        assert!(logs_contain("Using default password"));
    }

    #[tokio::test]
    async fn test_execute_while_disconnected() {
        let client = EslClient::new(&config()).unwrap();
        let mut signals = client.connection_signals();

        let result = client.execute_command("show channels as json").await;
        assert!(matches!(result, Err(EslError::NotConnected { .. })));

        // No connection attempt was made, so nothing was reported either.
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(signals.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let client = EslClient::new(&config()).unwrap();
        let first = client.shutdown_token();

        client.stop().await;
        client.stop().await;

        assert!(first.is_cancelled());
        assert!(!client.shutdown_token().is_cancelled());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
