//! # CDEF Session
//!
//! ## Purpose
//!
//! One logical conversation between a `to` and a `from` descriptor,
//! multiplexed over a [`Connection`]. The session runs the connect and
//! disconnect handshake, retries after rejections, and queues inbound
//! application messages for its consumer.
//!
//! ## Handshake
//!
//! ```text
//! NotEstablished ──connect_session()──► awaiting 0x3308 response
//!       ▲                                   │ code 0: Established, heartbeats on
//!       │                                   │ code ≠ 0: SessionConnectFailed(delay), retry after delay
//!       └──── 0x3309 from peer / connection lost ◄── Established
//! ```
//!
//! A connect response only counts while a request is outstanding; stray
//! responses are logged and dropped. Losing the connection cancels any
//! scheduled retry, since the owner redials and reconnects the session.
//!
//! A permanently connected session skips the handshake and stays usable
//! across connection drops.
//!
//! ## Threading
//!
//! [`Session::is_interested`] and [`Session::enqueue`] run on the
//! connection's receive task. Everything the consumer sees is raised as a
//! [`SessionEvent`] and delivered on the dispatcher loop. The inbound queue
//! is the only state both sides touch, and its lock is never held across a
//! send.

use crate::connection::Connection;
use crate::error::{NetworkError, Result};
use crate::timer::{runtime_handle, OneShotTimer};
use bytes::Bytes;
use cdef_config::SessionConfig;
use codec::function_code::describe;
use codec::{
    peek, CdefMessage, DeviceType, FunctionCode, Message, ProtocolKind, SessionConnect,
    SessionConnectResponse, SessionDescriptor, SessionDisconnect, SessionKey,
};
use dispatcher::{Dispatcher, EventHandler, HandlerId, Mailbox};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Application side of a session; all calls except `interested` arrive on
/// the dispatcher loop
pub trait SessionConsumer: Send + Sync + 'static {
    /// Filter for application frames addressed to this session. Runs on the
    /// receive task.
    fn interested(&self, _session: &Session, _frame: &[u8]) -> bool {
        true
    }

    /// At least one message is waiting in [`Session::next_message`]
    fn message_ready(&self, session: &Session);

    fn session_connected(&self, _session: &Session) {}

    /// Peer rejected the connect; it asked for a retry after `retry_ms`
    fn session_connect_failed(&self, _session: &Session, _retry_ms: i32) {}

    fn session_disconnected(&self, _session: &Session) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    MessageReady,
    Connected,
    ConnectFailed(i32),
    /// Peer disconnected the session
    Disconnected,
    /// The connection under the session went down
    ConnectionLost,
    /// Retry timer fired
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub auto_reconnect: bool,
    pub permanently_connected: bool,
    /// Retry delay after the peer disconnects the session
    pub disconnect_retry: Duration,
    pub device_type: u8,
    pub terminal_number: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            permanently_connected: false,
            disconnect_retry: Duration::from_secs(20),
            device_type: DeviceType::Rwt.into(),
            terminal_number: 0,
        }
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            auto_reconnect: config.auto_reconnect,
            permanently_connected: config.permanently_connected,
            disconnect_retry: config.disconnect_retry(),
            device_type: config.device_type,
            terminal_number: config.terminal_number,
        }
    }
}

pub struct Session {
    key: SessionKey,
    to: SessionDescriptor,
    /// Raw source descriptor; the sales location is rewritten on connect
    from: AtomicU32,
    options: SessionOptions,
    established: AtomicBool,
    /// Connect request sent, response not yet seen
    awaiting_response: AtomicBool,
    connection: RwLock<Weak<Connection>>,
    inbound: Mutex<VecDeque<Bytes>>,
    consumer: Arc<dyn SessionConsumer>,
    mailbox: Mailbox<SessionEvent>,
    reconnect_timer: OneShotTimer,
    connect_attempts: AtomicU64,
}

impl Session {
    /// New session registered on `dispatcher`, not yet attached to a connection
    pub fn create(
        dispatcher: &Dispatcher,
        to: SessionDescriptor,
        from: SessionDescriptor,
        options: SessionOptions,
        consumer: Arc<dyn SessionConsumer>,
    ) -> Result<Arc<Self>> {
        let runtime = runtime_handle()?;
        Ok(dispatcher.register(move |mailbox| {
            Arc::new(Session {
                key: SessionKey::new(to, from),
                to,
                from: AtomicU32::new(from.raw()),
                established: AtomicBool::new(options.permanently_connected),
                awaiting_response: AtomicBool::new(false),
                options,
                connection: RwLock::new(Weak::new()),
                inbound: Mutex::new(VecDeque::new()),
                consumer,
                mailbox,
                reconnect_timer: OneShotTimer::new("session-reconnect", runtime),
                connect_attempts: AtomicU64::new(0),
            })
        }))
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn to(&self) -> SessionDescriptor {
        self.to
    }

    pub fn from(&self) -> SessionDescriptor {
        SessionDescriptor::from_raw(self.from.load(Ordering::Acquire))
    }

    pub fn sales_location(&self) -> u32 {
        self.from().sales_location()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Dispatcher handler id, for deregistration
    pub fn handler_id(&self) -> HandlerId {
        self.mailbox.id()
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.read().upgrade()
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Connect requests sent so far
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// A retry is scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_armed()
    }

    /// A connect request is outstanding
    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response.load(Ordering::Acquire)
    }

    pub(crate) fn attach(&self, connection: Weak<Connection>) {
        *self.connection.write() = connection;
    }

    pub(crate) fn detach(&self) {
        *self.connection.write() = Weak::new();
    }

    fn attached(&self) -> Result<Arc<Connection>> {
        self.connection()
            .ok_or_else(|| NetworkError::SessionUnattached {
                key: self.key.to_string(),
            })
    }

    /// Whether the session can carry application traffic
    ///
    /// Fails when the session has no connection to send on.
    pub fn check_state(&self) -> Result<bool> {
        self.attached()?;
        Ok(self.is_established())
    }

    /// Session-protocol frames always; otherwise frames addressed to our
    /// `from` descriptor that the consumer accepts
    pub fn is_interested(&self, frame: &[u8]) -> bool {
        if peek::peek_protocol(frame) == Some(u8::from(ProtocolKind::Session)) {
            return true;
        }
        match peek::peek_to_descriptor(frame) {
            Some(to) if to.same_address(self.from()) => self.consumer.interested(self, frame),
            _ => false,
        }
    }

    /// Take a frame from the connection
    ///
    /// Connect responses and disconnects drive the handshake here; other
    /// frames are queued when the session is established and dropped
    /// otherwise.
    pub fn enqueue(&self, frame: Bytes) {
        let function_code = peek::peek_function_code(&frame);
        if function_code == Some(FunctionCode::SessionEstablishmentConnect.code()) {
            if self.is_control_for_me(&frame) {
                self.on_connect_message(&frame);
            }
        } else if self.is_established() {
            if function_code == Some(FunctionCode::SessionEstablishmentDisconnect.code()) {
                if self.is_control_for_me(&frame) {
                    self.on_disconnect_message(&frame);
                }
            } else {
                self.inbound.lock().push_back(frame);
                self.mailbox.raise(SessionEvent::MessageReady);
            }
        } else {
            warn!(
                session = %self.key,
                function_code = %function_code.map(describe).unwrap_or_default(),
                "no active session, dropping message"
            );
        }
    }

    /// Session control frames reach every session on the connection. The
    /// sales location is assigned by the peer, so only the address type and
    /// unique address identify the target.
    fn is_control_for_me(&self, frame: &[u8]) -> bool {
        let from = self.from();
        match peek::peek_to_descriptor(frame) {
            Some(to) if to.is_broadcast() => true,
            Some(to) => {
                to.address_type() == from.address_type()
                    && to.unique_address() == from.unique_address()
            }
            None => false,
        }
    }

    fn on_connect_message(&self, frame: &[u8]) {
        if self.is_established() {
            warn!(session = %self.key, "received another connect while session already active");
            return;
        }
        if !peek::is_response(frame) {
            debug!(session = %self.key, "ignoring inbound connect request");
            return;
        }

        let response = match Message::<SessionConnectResponse>::decode(frame) {
            Ok(response) => response,
            Err(e) => {
                warn!(session = %self.key, error = %e, "undecodable connect response");
                return;
            }
        };
        if !self.awaiting_response.swap(false, Ordering::AcqRel) {
            warn!(session = %self.key, "connect response without outstanding request, dropping");
            return;
        }

        let Some(body) = response.body() else {
            warn!(session = %self.key, errors = ?response.errors(), "connect answered with error list");
            self.connect_rejected(0);
            return;
        };

        if body.is_accepted() {
            let sales_location = response.header.to.sales_location();
            let mut from = self.from();
            from.set_sales_location(sales_location);
            self.from.store(from.raw(), Ordering::Release);

            let connection = self.connection();
            if let Some(connection) = &connection {
                connection.enable_heartbeats();
            }
            self.established.store(true, Ordering::Release);
            info!(
                session = %self.key,
                sales_location,
                local_port = ?connection.and_then(|c| c.local_port()),
                "session connect accepted"
            );
            self.mailbox.raise(SessionEvent::Connected);
        } else {
            warn!(
                session = %self.key,
                connect_code = body.connect_code,
                text = %body.connection_text,
                "Connect failed, reconnecting in {}ms",
                body.time_difference
            );
            self.connect_rejected(body.time_difference.max(0));
        }
    }

    fn connect_rejected(&self, retry_ms: i32) {
        self.mailbox.raise(SessionEvent::ConnectFailed(retry_ms));
        if self.options.auto_reconnect {
            self.reconnect_timer.arm(
                Duration::from_millis(retry_ms as u64),
                &self.mailbox,
                SessionEvent::Reconnect,
            );
        }
    }

    fn on_disconnect_message(&self, frame: &[u8]) {
        let reason = Message::<SessionDisconnect>::decode(frame)
            .ok()
            .and_then(|m| m.body().map(|b| b.disconnection_text.clone()))
            .unwrap_or_default();
        self.established.store(false, Ordering::Release);
        info!(session = %self.key, reason = %reason, "session disconnected by peer");
        self.mailbox.raise(SessionEvent::Disconnected);

        if self.options.auto_reconnect {
            self.reconnect_timer.arm(
                self.options.disconnect_retry,
                &self.mailbox,
                SessionEvent::Reconnect,
            );
        }
    }

    /// Oldest queued inbound frame
    pub fn next_message(&self) -> Option<Bytes> {
        self.inbound.lock().pop_front()
    }

    pub fn pending_messages(&self) -> usize {
        self.inbound.lock().len()
    }

    fn clear_queue(&self) -> usize {
        let mut inbound = self.inbound.lock();
        let cleared = inbound.len();
        inbound.clear();
        cleared
    }

    /// Send the session Connect request
    pub fn connect_session(&self) -> Result<()> {
        let connection = self.attached()?;
        if self.is_established() {
            warn!(session = %self.key, "connect requested but session already established");
            return Ok(());
        }

        let request = Message::new(SessionConnect {
            function_flags: 0,
            device_type: self.options.device_type,
            terminal_number: self.options.terminal_number,
        })
        .addressed(self.to, self.from());
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.awaiting_response.store(true, Ordering::Release);
        debug!(session = %self.key, "sending session connect");
        connection.send(request.encode()?)
    }

    /// End the session
    ///
    /// An established session sends a Disconnect carrying `reason` and, if
    /// `disconnect_after_send`, closes the connection once it is written.
    /// Otherwise the connection is simply disconnected.
    pub fn disconnect_session(&self, reason: &str, disconnect_after_send: bool) -> Result<()> {
        let connection = self.attached()?;
        if self.is_established() {
            let message = Message::new(SessionDisconnect::with_reason(reason))
                .addressed(self.to, self.from());
            connection.disconnect_with(message.encode()?, disconnect_after_send)?;
            self.established.store(false, Ordering::Release);
        } else {
            connection.disconnect();
        }
        Ok(())
    }

    /// Stamp our addresses on `message` and send it
    ///
    /// Application messages are refused until the session is established.
    pub fn send(&self, message: &mut dyn CdefMessage) -> Result<()> {
        self.send_to(message, self.to)
    }

    /// Like [`Session::send`] but addressed to the broadcast descriptor
    pub fn broadcast_send(&self, message: &mut dyn CdefMessage) -> Result<()> {
        self.send_to(message, SessionDescriptor::BROADCAST)
    }

    fn send_to(&self, message: &mut dyn CdefMessage, to: SessionDescriptor) -> Result<()> {
        let connection = self.attached()?;
        if message.header().protocol != ProtocolKind::Session && !self.is_established() {
            return Err(NetworkError::NotEstablished {
                key: self.key.to_string(),
            });
        }

        let header = message.header_mut();
        header.to = to;
        header.from = self.from();
        connection.send(message.finalize()?)
    }

    /// The connection under this session went down
    ///
    /// Cancels a scheduled retry, forgets any outstanding connect and,
    /// unless permanently connected, clears the established flag. Queued
    /// messages are dropped.
    pub fn connection_lost(&self) {
        self.reconnect_timer.cancel();
        self.awaiting_response.store(false, Ordering::Release);
        if !self.options.permanently_connected {
            self.established.store(false, Ordering::Release);
        }
        self.session_ended("connection lost");
    }

    pub(crate) fn notify_connection_lost(&self) {
        self.mailbox.raise(SessionEvent::ConnectionLost);
    }

    fn session_ended(&self, cause: &'static str) {
        let cleared = self.clear_queue();
        debug!(session = %self.key, cleared, cause, "session ended");
        self.consumer.session_disconnected(self);
    }

    fn on_reconnect(&self) {
        match self.check_state() {
            Ok(false) => {
                if let Err(e) = self.connect_session() {
                    warn!(session = %self.key, error = %e, "session reconnect failed");
                }
            }
            Ok(true) => {}
            Err(e) => warn!(session = %self.key, error = %e, "cannot reconnect session"),
        }
    }
}

impl EventHandler for Session {
    type Event = SessionEvent;

    fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::MessageReady => self.consumer.message_ready(self),
            SessionEvent::Connected => self.consumer.session_connected(self),
            SessionEvent::ConnectFailed(retry_ms) => {
                self.consumer.session_connect_failed(self, retry_ms)
            }
            SessionEvent::Disconnected => self.session_ended("peer disconnect"),
            SessionEvent::ConnectionLost => self.connection_lost(),
            SessionEvent::Reconnect => self.on_reconnect(),
        }
    }

    fn dispatcher_stop(&self) {
        self.reconnect_timer.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("established", &self.is_established())
            .field("pending", &self.pending_messages())
            .finish()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}
