//! # CDEF TCP Connection
//!
//! ## Purpose
//!
//! Owns one TCP socket and everything that happens on it: connect, framed
//! receive, send, heartbeat transmission and receive-timeout supervision.
//! Sessions registered on the connection are offered every inbound frame.
//!
//! ## States
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Connected ──disconnect()──► Disconnecting
//!      ▲                          │              │                            │
//!      └────── connect failure ───┘     peer close / I/O error                │
//!      └──────────────────────────────────────────┴───────────────────────────┘
//! ```
//!
//! ## Threading
//!
//! The connection is a dispatcher [`EventHandler`]. Socket I/O runs on its
//! own reader and writer tasks which only raise events; state changes and
//! observer callbacks happen on the dispatcher loop. The reader task alone
//! owns the receive buffer and does the framing, then hands each frame to
//! interested sessions (whose inbound queues are locked) or to the owner.
//!
//! Every socket lifetime gets a new epoch. Completions carry the epoch they
//! were started under, so anything that arrives after a disconnect is
//! recognised as stale and ignored.

use crate::error::{NetworkError, Result};
use crate::framing::FrameBuffer;
use crate::session::Session;
use crate::timer::{runtime_handle, OneShotTimer};
use bytes::Bytes;
use cdef_config::ConnectionConfig;
use codec::{peek, Heartbeat, Message, SessionDescriptor, SessionKey, CDEF_MAX_SIZE};
use dispatcher::{Dispatcher, EventHandler, Mailbox};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection tuning
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Heartbeat send interval once a session is up; `None` disables
    pub heartbeat_interval: Option<Duration>,
    /// Silence after which the peer is declared dead; `None` disables
    pub receive_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub max_message_size: usize,
    /// Skip framing and hand every received chunk to the owner
    pub raw_receive: bool,
    pub heartbeat_to: SessionDescriptor,
    pub heartbeat_from: SessionDescriptor,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: None,
            receive_timeout: None,
            connect_timeout: Duration::from_secs(10),
            max_message_size: CDEF_MAX_SIZE,
            raw_receive: false,
            heartbeat_to: SessionDescriptor::BROADCAST,
            heartbeat_from: SessionDescriptor::BROADCAST,
        }
    }
}

impl TryFrom<&ConnectionConfig> for ConnectionOptions {
    type Error = NetworkError;

    fn try_from(config: &ConnectionConfig) -> Result<Self> {
        let descriptor = |value: Option<cdef_config::DescriptorConfig>, field: &str| {
            value
                .map(|d| d.descriptor())
                .transpose()
                .map_err(|e| NetworkError::configuration(e.to_string(), Some(field)))
                .map(|d| d.unwrap_or(SessionDescriptor::BROADCAST))
        };

        if config.max_message_size > CDEF_MAX_SIZE {
            return Err(NetworkError::configuration(
                format!(
                    "max_message_size {} exceeds protocol maximum {}",
                    config.max_message_size, CDEF_MAX_SIZE
                ),
                Some("max_message_size"),
            ));
        }

        Ok(Self {
            heartbeat_interval: config.heartbeat_interval(),
            receive_timeout: config.receive_timeout(),
            connect_timeout: config.connect_timeout(),
            max_message_size: config.max_message_size,
            raw_receive: config.raw_receive,
            heartbeat_to: descriptor(config.heartbeat_to, "heartbeat_to")?,
            heartbeat_from: descriptor(config.heartbeat_from, "heartbeat_from")?,
        })
    }
}

/// Owner of a connection
///
/// Every method except `interested` is called on the dispatcher loop.
pub trait ConnectionObserver: Send + Sync + 'static {
    fn connected(&self, _connection: &Connection) {}

    fn connect_failed(&self, _connection: &Connection, _error: &NetworkError) {}

    /// `reason` is `None` for a locally requested disconnect
    fn disconnected(&self, _connection: &Connection, _reason: Option<&NetworkError>) {}

    /// A send failed; the connection is being torn down
    fn send_error(&self, _connection: &Connection, _error: &NetworkError) {}

    /// Nothing arrived within the receive timeout; the connection is being torn down
    fn receive_timeout(&self, _connection: &Connection, _error: &NetworkError) {}

    /// Whether the owner wants a frame that arrived while no session is
    /// registered. Runs on the receive task, so it must be cheap.
    fn interested(&self, _connection_id: &str, _frame: &[u8]) -> bool {
        false
    }

    /// A frame the owner was interested in, or a raw chunk in raw mode
    fn received(&self, _connection: &Connection, _data: Bytes) {}
}

/// Completion events raised by the I/O tasks and timers
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected { epoch: u64, stream: TcpStream },
    ConnectFailed { epoch: u64, error: NetworkError },
    Received { epoch: u64, data: Bytes },
    /// Socket gone; `error` is `None` for a local disconnect
    Closed { epoch: u64, error: Option<NetworkError> },
    SendComplete { epoch: u64, bytes: usize, close_after: bool },
    SendError { epoch: u64, error: NetworkError },
    HeartbeatDue { epoch: u64 },
    ReceiveTimeout { epoch: u64 },
}

/// Snapshot of connection counters
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub id: String,
    pub state: ConnectionState,
    pub peer_addr: Option<SocketAddr>,
    pub local_port: Option<u16>,
    pub connected_for: Option<Duration>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub sessions: usize,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

struct Outbound {
    data: Bytes,
    close_after: bool,
}

struct Inner {
    state: ConnectionState,
    epoch: u64,
    remote: Option<String>,
    peer_addr: Option<SocketAddr>,
    local_port: Option<u16>,
    connected_at: Option<Instant>,
    writer: Option<mpsc::UnboundedSender<Outbound>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Connection {
    id: String,
    me: Weak<Connection>,
    options: ConnectionOptions,
    observer: Arc<dyn ConnectionObserver>,
    mailbox: Mailbox<ConnectionEvent>,
    runtime: Handle,
    inner: Mutex<Inner>,
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
    heartbeat_frame: Bytes,
    heartbeat_timer: OneShotTimer,
    receive_timer: OneShotTimer,
    heartbeats_on: AtomicBool,
    disconnect_pending: AtomicBool,
    counters: Counters,
}

impl Connection {
    /// New outbound connection in the Disconnected state
    ///
    /// Must be called inside a tokio runtime.
    pub fn create(
        dispatcher: &Dispatcher,
        id: impl Into<String>,
        options: ConnectionOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>> {
        let runtime = runtime_handle()?;
        let heartbeat_frame = Message::new(Heartbeat::default())
            .addressed(options.heartbeat_to, options.heartbeat_from)
            .encode()?;
        let id = id.into();

        let connection = dispatcher.register(move |mailbox| {
            Arc::new_cyclic(|me| Connection {
                id,
                me: me.clone(),
                options,
                observer,
                mailbox,
                heartbeat_timer: OneShotTimer::new("heartbeat", runtime.clone()),
                receive_timer: OneShotTimer::new("receive", runtime.clone()),
                runtime,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    remote: None,
                    peer_addr: None,
                    local_port: None,
                    connected_at: None,
                    writer: None,
                    tasks: Vec::new(),
                }),
                sessions: RwLock::new(HashMap::new()),
                heartbeat_frame: Bytes::from(heartbeat_frame),
                heartbeats_on: AtomicBool::new(false),
                disconnect_pending: AtomicBool::new(false),
                counters: Counters::default(),
            })
        });
        debug!(connection_id = %connection.id, handler_id = connection.mailbox.id(), "connection created");
        Ok(connection)
    }

    /// Wrap a socket accepted by a listener; starts out Connected
    pub fn accepted(
        dispatcher: &Dispatcher,
        id: impl Into<String>,
        stream: TcpStream,
        options: ConnectionOptions,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>> {
        let connection = Self::create(dispatcher, id, options, observer)?;
        {
            let mut inner = connection.inner.lock();
            inner.epoch += 1;
            inner.remote = stream.peer_addr().ok().map(|addr| addr.to_string());
            let epoch = inner.epoch;
            connection.start_io(&mut inner, stream, epoch);
        }
        info!(connection_id = %connection.id, peer = ?connection.peer_addr(), "accepted connection ready");
        Ok(connection)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared handle to this connection
    pub fn handle(&self) -> Option<Arc<Connection>> {
        self.me.upgrade()
    }

    /// Dispatcher handler id, for deregistration
    pub fn handler_id(&self) -> dispatcher::HandlerId {
        self.mailbox.id()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().peer_addr
    }

    pub fn local_port(&self) -> Option<u16> {
        self.inner.lock().local_port
    }

    /// A final message is in flight and the connection closes after it
    pub fn disconnect_pending(&self) -> bool {
        self.disconnect_pending.load(Ordering::Acquire)
    }

    pub fn heartbeats_enabled(&self) -> bool {
        self.heartbeats_on.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ConnectionStats {
        let inner = self.inner.lock();
        ConnectionStats {
            id: self.id.clone(),
            state: inner.state,
            peer_addr: inner.peer_addr,
            local_port: inner.local_port,
            connected_for: inner.connected_at.map(|at| at.elapsed()),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            sessions: self.sessions.read().len(),
        }
    }

    /// Begin an asynchronous connect
    ///
    /// Fails immediately unless the connection is Disconnected. The outcome
    /// arrives later as `connected` or `connect_failed` on the observer.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        let remote = format!("{host}:{port}");
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Disconnected {
            return Err(NetworkError::invalid_state("connect", inner.state.as_str()));
        }

        inner.state = ConnectionState::Connecting;
        inner.epoch += 1;
        inner.remote = Some(remote.clone());
        let epoch = inner.epoch;

        info!(connection_id = %self.id, "Connecting to TCP peer at {}", remote);
        let mailbox = self.mailbox.clone();
        let timeout = self.options.connect_timeout;
        let task = self.runtime.spawn(async move {
            let event = match tokio::time::timeout(timeout, TcpStream::connect(remote.as_str())).await {
                Ok(Ok(stream)) => ConnectionEvent::Connected { epoch, stream },
                Ok(Err(e)) => ConnectionEvent::ConnectFailed {
                    epoch,
                    error: NetworkError::connect_failed_with_source(
                        "Failed to connect to TCP peer",
                        Some(&remote),
                        e,
                    ),
                },
                Err(_) => ConnectionEvent::ConnectFailed {
                    epoch,
                    error: NetworkError::timeout("TCP connect", timeout.as_millis() as u64),
                },
            };
            mailbox.raise(event);
        });
        inner.tasks.push(task);
        Ok(())
    }

    /// Queue bytes for sending; only valid while Connected
    ///
    /// A successful send pushes the next heartbeat back by a full interval.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.queue_send(data.into(), false)
    }

    fn queue_send(&self, data: Bytes, close_after: bool) -> Result<()> {
        let epoch = {
            let inner = self.inner.lock();
            if inner.state != ConnectionState::Connected {
                return Err(NetworkError::not_connected("send"));
            }
            let writer = inner
                .writer
                .as_ref()
                .ok_or_else(|| NetworkError::not_connected("send"))?;
            if writer.send(Outbound { data, close_after }).is_err() {
                return Err(NetworkError::not_connected("send"));
            }
            inner.epoch
        };

        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        if self.heartbeats_enabled() {
            self.arm_heartbeat(epoch);
        }
        Ok(())
    }

    /// Send a final message, optionally closing once it has been written
    ///
    /// While the close is pending every inbound byte is discarded. When not
    /// connected this is a plain [`Connection::disconnect`].
    pub fn disconnect_with(&self, data: impl Into<Bytes>, disconnect_after_send: bool) -> Result<()> {
        if !self.is_connected() {
            self.disconnect();
            return Ok(());
        }
        if disconnect_after_send {
            self.disconnect_pending.store(true, Ordering::Release);
        }
        if let Err(e) = self.queue_send(data.into(), disconnect_after_send) {
            warn!(connection_id = %self.id, error = %e, "final send failed, disconnecting");
            self.disconnect();
            return Err(e);
        }
        Ok(())
    }

    /// Request a disconnect; returns `false` if there was nothing to do
    ///
    /// Completes asynchronously with `disconnected` on the observer.
    pub fn disconnect(&self) -> bool {
        let epoch = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    debug!(connection_id = %self.id, state = %inner.state, "disconnect requested");
                    inner.state = ConnectionState::Disconnecting;
                    Self::teardown(&mut inner);
                    inner.epoch
                }
                _ => return false,
            }
        };
        self.disable_heartbeats();
        self.mailbox.raise(ConnectionEvent::Closed { epoch, error: None });
        true
    }

    /// Start heartbeats and receive-timeout supervision, as configured
    pub fn enable_heartbeats(&self) {
        let epoch = self.inner.lock().epoch;
        if self.options.heartbeat_interval.is_some() {
            self.heartbeats_on.store(true, Ordering::Release);
            self.arm_heartbeat(epoch);
        }
        if let Some(timeout) = self.options.receive_timeout {
            self.receive_timer
                .arm(timeout, &self.mailbox, ConnectionEvent::ReceiveTimeout { epoch });
        }
    }

    pub fn disable_heartbeats(&self) {
        self.heartbeats_on.store(false, Ordering::Release);
        self.heartbeat_timer.cancel();
        self.receive_timer.cancel();
    }

    fn arm_heartbeat(&self, epoch: u64) {
        if let Some(interval) = self.options.heartbeat_interval {
            self.heartbeat_timer
                .arm(interval, &self.mailbox, ConnectionEvent::HeartbeatDue { epoch });
        }
    }

    /// Add a session; its key must be unique on this connection
    pub fn register_session(&self, session: &Arc<Session>) -> Result<()> {
        let key = session.key();
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            return Err(NetworkError::SessionExists {
                key: key.to_string(),
                connection: self.id.clone(),
            });
        }
        session.attach(self.me.clone());
        sessions.insert(key, Arc::clone(session));
        debug!(connection_id = %self.id, session = %key, "session registered");
        Ok(())
    }

    /// Remove a session
    ///
    /// Removing the last session disconnects, unless a final message is
    /// already on its way out.
    pub fn deregister_session(&self, key: &SessionKey) -> bool {
        let (removed, now_empty) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(key);
            (removed, sessions.is_empty())
        };
        if let Some(session) = &removed {
            session.detach();
            debug!(connection_id = %self.id, session = %key, "session deregistered");
        }
        if now_empty && !self.disconnect_pending() {
            self.disconnect();
        }
        removed.is_some()
    }

    pub fn session(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().get(key).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn start_io(&self, inner: &mut Inner, stream: TcpStream, epoch: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        inner.peer_addr = stream.peer_addr().ok();
        inner.local_port = stream.local_addr().ok().map(|addr| addr.port());

        let (read_half, write_half) = stream.into_split();
        let (sender, outbound) = mpsc::unbounded_channel();
        inner.writer = Some(sender);
        inner.tasks.push(self.runtime.spawn(write_loop(
            write_half,
            outbound,
            self.mailbox.clone(),
            epoch,
        )));
        inner.tasks.push(self.runtime.spawn(read_loop(
            read_half,
            self.me.clone(),
            epoch,
            self.options.max_message_size,
        )));

        inner.state = ConnectionState::Connected;
        inner.connected_at = Some(Instant::now());
        self.disconnect_pending.store(false, Ordering::Release);
    }

    fn teardown(inner: &mut Inner) {
        inner.writer = None;
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        inner.connected_at = None;
    }

    /// Receive-task side: account, supervise and frame one chunk
    fn on_bytes(&self, buffer: &mut FrameBuffer, count: usize, epoch: u64) -> Result<()> {
        self.counters
            .bytes_received
            .fetch_add(count as u64, Ordering::Relaxed);
        if let Some(timeout) = self.options.receive_timeout {
            self.receive_timer
                .arm(timeout, &self.mailbox, ConnectionEvent::ReceiveTimeout { epoch });
        }

        if self.disconnect_pending() {
            trace!(connection_id = %self.id, count, "discarding input while disconnecting");
            buffer.clear();
            return Ok(());
        }

        if self.options.raw_receive {
            let data = buffer.take_all();
            self.mailbox.raise(ConnectionEvent::Received { epoch, data });
            return Ok(());
        }

        while let Some(frame) = buffer.next_frame()? {
            self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
            self.route(frame, epoch);
        }
        Ok(())
    }

    /// Offer a frame to every interested session, or to the owner when none exist
    fn route(&self, frame: Bytes, epoch: u64) {
        if peek::is_heartbeat(&frame) {
            trace!(connection_id = %self.id, "heartbeat received");
            return;
        }

        let sessions = self.sessions();
        if sessions.is_empty() {
            if self.observer.interested(&self.id, &frame) {
                self.mailbox.raise(ConnectionEvent::Received { epoch, data: frame });
            }
            return;
        }

        let mut delivered = false;
        for session in sessions {
            if session.is_interested(&frame) {
                session.enqueue(frame.clone());
                delivered = true;
            }
        }
        if !delivered {
            trace!(
                connection_id = %self.id,
                function_code = ?peek::peek_function_code(&frame),
                "no session interested in frame"
            );
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }

    fn on_connected(&self, epoch: u64, stream: TcpStream) {
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
                debug!(connection_id = %self.id, state = %inner.state, "dropping connect completion");
                return;
            }
            self.start_io(&mut inner, stream, epoch);
        }
        info!(
            connection_id = %self.id,
            peer = ?self.peer_addr(),
            local_port = ?self.local_port(),
            "Successfully connected to TCP peer"
        );
        self.observer.connected(self);
    }

    fn on_connect_failed(&self, epoch: u64, error: NetworkError) {
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return;
            }
            Self::teardown(&mut inner);
            inner.state = ConnectionState::Disconnected;
            inner.epoch += 1;
        }
        warn!(connection_id = %self.id, error = %error, "connect failed");
        self.observer.connect_failed(self, &error);
    }

    fn on_closed(&self, epoch: u64, error: Option<NetworkError>) {
        let (reason, remote) = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state == ConnectionState::Disconnected {
                trace!(connection_id = %self.id, "stale close ignored");
                return;
            }
            // errors are expected once we asked for the close
            let reason = if inner.state == ConnectionState::Disconnecting {
                None
            } else {
                error
            };
            Self::teardown(&mut inner);
            inner.state = ConnectionState::Disconnected;
            inner.epoch += 1;
            (reason, inner.remote.clone())
        };

        self.disable_heartbeats();
        self.disconnect_pending.store(false, Ordering::Release);
        match &reason {
            Some(e) => warn!(connection_id = %self.id, remote = ?remote, error = %e, "Remote disconnect"),
            None => info!(connection_id = %self.id, remote = ?remote, "Disconnected"),
        }

        self.observer.disconnected(self, reason.as_ref());
        for session in self.sessions() {
            session.notify_connection_lost();
        }
    }

    fn on_heartbeat_due(&self, epoch: u64) {
        if !self.is_current(epoch) || !self.heartbeats_enabled() || !self.is_connected() {
            return;
        }
        if let Err(e) = self.send(self.heartbeat_frame.clone()) {
            error!(connection_id = %self.id, error = %e, "Failed to send heartbeat");
        }
    }

    fn on_receive_timeout(&self, epoch: u64) {
        if !self.is_current(epoch) || !self.is_connected() {
            return;
        }
        let timeout_ms = self
            .options
            .receive_timeout
            .map(|t| t.as_millis() as u64)
            .unwrap_or_default();
        let error = NetworkError::receive_timeout(timeout_ms, self.peer_addr());
        warn!(connection_id = %self.id, timeout_ms, "ReceiveTimeout - disconnecting");
        self.observer.receive_timeout(self, &error);
        self.disconnect();
    }

    fn on_send_complete(&self, epoch: u64, bytes: usize, close_after: bool) {
        self.counters
            .bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
        if close_after && self.is_current(epoch) {
            debug!(connection_id = %self.id, "final message sent, closing");
            self.disconnect();
        }
    }

    fn on_send_error(&self, epoch: u64, error: NetworkError) {
        if !self.is_current(epoch) {
            return;
        }
        warn!(connection_id = %self.id, error = %error, "Send Error");
        self.observer.send_error(self, &error);
        self.disconnect();
    }
}

impl EventHandler for Connection {
    type Event = ConnectionEvent;

    fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { epoch, stream } => self.on_connected(epoch, stream),
            ConnectionEvent::ConnectFailed { epoch, error } => self.on_connect_failed(epoch, error),
            ConnectionEvent::Received { epoch, data } => {
                if self.is_current(epoch) && self.is_connected() {
                    self.observer.received(self, data);
                }
            }
            ConnectionEvent::Closed { epoch, error } => self.on_closed(epoch, error),
            ConnectionEvent::SendComplete {
                epoch,
                bytes,
                close_after,
            } => self.on_send_complete(epoch, bytes, close_after),
            ConnectionEvent::SendError { epoch, error } => self.on_send_error(epoch, error),
            ConnectionEvent::HeartbeatDue { epoch } => self.on_heartbeat_due(epoch),
            ConnectionEvent::ReceiveTimeout { epoch } => self.on_receive_timeout(epoch),
        }
    }

    fn dispatcher_stop(&self) {
        self.disconnect();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.lock().remote.as_deref() {
            Some(remote) => write!(f, "{} ({})", self.id, remote),
            None => f.write_str(&self.id),
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mailbox: Mailbox<ConnectionEvent>,
    epoch: u64,
) {
    while let Some(item) = outbound.recv().await {
        match writer.write_all(&item.data).await {
            Ok(()) => {
                mailbox.raise(ConnectionEvent::SendComplete {
                    epoch,
                    bytes: item.data.len(),
                    close_after: item.close_after,
                });
            }
            Err(e) => {
                mailbox.raise(ConnectionEvent::SendError {
                    epoch,
                    error: NetworkError::io("Send failed", e),
                });
                return;
            }
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    connection: Weak<Connection>,
    epoch: u64,
    max_message_size: usize,
) {
    let mut buffer = FrameBuffer::new(max_message_size);
    let error = loop {
        buffer.prepare_fill();
        let result = reader.read(buffer.spare_mut()).await;
        let Some(connection) = connection.upgrade() else {
            return;
        };
        match result {
            Ok(0) => {
                break NetworkError::io(
                    "Remote closed connection",
                    io::Error::new(io::ErrorKind::UnexpectedEof, "0 byte read"),
                );
            }
            Ok(count) => {
                buffer.commit(count);
                if let Err(e) = connection.on_bytes(&mut buffer, count, epoch) {
                    error!(connection_id = %connection.id, error = %e, "Received CDEF length exceeded limit");
                    break e;
                }
            }
            Err(e) => break NetworkError::io("Receive failed", e),
        }
    };

    if let Some(connection) = connection.upgrade() {
        connection.mailbox.raise(ConnectionEvent::Closed {
            epoch,
            error: Some(error),
        });
    }
}
