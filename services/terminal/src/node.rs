//! # Terminal Node
//!
//! ## Purpose
//!
//! Brings a [`CommsConfig`] to life: one [`Connection`] per configured host,
//! the configured [`Session`]s registered on each, and an optional inbound
//! [`Listener`]. Owns the redial policy: a dropped or failed TCP connection
//! is dialled again after its `reconnect_delay`, and every session on it
//! starts its handshake once the socket is up.
//!
//! Inbound application traffic is decoded through a shared
//! [`MessageRegistry`] and logged.

use anyhow::{Context, Result};
use bytes::Bytes;
use cdef_config::{CommsConfig, ConnectionConfig};
use codec::function_code::describe;
use codec::{Lookup, MessageRegistry};
use dispatcher::Dispatcher;
use network::{
    Connection, ConnectionObserver, ConnectionOptions, Listener, ListenerObserver, NetworkError,
    Session, SessionConsumer, SessionOptions,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Log one inbound frame through the registry
fn log_frame(registry: &MessageRegistry, origin: &str, frame: &[u8]) {
    match registry.lookup(frame) {
        Lookup::Decoded(message) => {
            info!(
                origin,
                header = %message.header(),
                to = %message.header().to,
                from = %message.header().from,
                "message received"
            );
        }
        Lookup::Unknown(function_code) => {
            info!(
                origin,
                function_code = %describe(function_code),
                bytes = frame.len(),
                "unregistered message received"
            );
        }
        Lookup::Failed(e) => warn!(origin, error = %e, "failed to decode message"),
    }
}

/// Dials one host and redials it after failures
struct Redialer {
    host: String,
    port: u16,
    delay: Duration,
    stopping: Arc<AtomicBool>,
    registry: Arc<MessageRegistry>,
}

impl Redialer {
    fn schedule(&self, connection: &Connection) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }
        let Some(connection) = connection.handle() else {
            return;
        };
        let host = self.host.clone();
        let port = self.port;
        let delay = self.delay;
        let stopping = Arc::clone(&self.stopping);
        info!(connection_id = %connection.id(), delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if stopping.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = connection.connect(&host, port) {
                warn!(connection_id = %connection.id(), error = %e, "reconnect not started");
            }
        });
    }
}

impl ConnectionObserver for Redialer {
    fn connected(&self, connection: &Connection) {
        for session in connection.sessions() {
            if session.options().permanently_connected {
                continue;
            }
            if let Err(e) = session.connect_session() {
                warn!(session = %session.key(), error = %e, "failed to start session connect");
            }
        }
    }

    fn connect_failed(&self, connection: &Connection, _error: &NetworkError) {
        self.schedule(connection);
    }

    fn disconnected(&self, connection: &Connection, _reason: Option<&NetworkError>) {
        self.schedule(connection);
    }

    fn interested(&self, _connection_id: &str, _frame: &[u8]) -> bool {
        true
    }

    fn received(&self, connection: &Connection, data: Bytes) {
        log_frame(&self.registry, connection.id(), &data);
    }
}

/// Drains and logs everything a session queues
struct TrafficLogger {
    registry: Arc<MessageRegistry>,
}

impl SessionConsumer for TrafficLogger {
    fn message_ready(&self, session: &Session) {
        let origin = session.key().to_string();
        while let Some(frame) = session.next_message() {
            log_frame(&self.registry, &origin, &frame);
        }
    }

    fn session_connected(&self, session: &Session) {
        info!(session = %session.key(), sales_location = session.sales_location(), "session established");
    }

    fn session_connect_failed(&self, session: &Session, retry_ms: i32) {
        warn!(session = %session.key(), retry_ms, "session connect rejected");
    }

    fn session_disconnected(&self, session: &Session) {
        info!(session = %session.key(), "session down");
    }
}

/// Inbound sockets become connections whose frames are logged
struct InboundAcceptor {
    dispatcher: Dispatcher,
    registry: Arc<MessageRegistry>,
    accepted: Mutex<Vec<Arc<Connection>>>,
}

struct InboundLogger {
    registry: Arc<MessageRegistry>,
}

impl ConnectionObserver for InboundLogger {
    fn interested(&self, _connection_id: &str, _frame: &[u8]) -> bool {
        true
    }

    fn received(&self, connection: &Connection, data: Bytes) {
        log_frame(&self.registry, connection.id(), &data);
    }
}

impl ListenerObserver for InboundAcceptor {
    fn new_connection(&self, _listener: &Listener, stream: TcpStream, peer: SocketAddr) {
        let mut accepted = self.accepted.lock();
        accepted.retain(|connection| {
            let alive = connection.is_connected();
            if !alive {
                self.dispatcher.deregister(connection.handler_id());
            }
            alive
        });

        let observer = Arc::new(InboundLogger {
            registry: Arc::clone(&self.registry),
        });
        match Connection::accepted(
            &self.dispatcher,
            format!("inbound-{peer}"),
            stream,
            ConnectionOptions::default(),
            observer,
        ) {
            Ok(connection) => accepted.push(connection),
            Err(e) => warn!(%peer, error = %e, "failed to adopt inbound connection"),
        }
    }

    fn listen_error(&self, _listener: &Listener, error: &NetworkError) {
        warn!(error = %error, "listener failed");
    }
}

/// Everything a running terminal owns
pub struct TerminalNode {
    dispatcher: Dispatcher,
    connections: Vec<(Arc<Connection>, ConnectionConfig)>,
    sessions: Vec<Arc<Session>>,
    listener: Option<Arc<Listener>>,
    stopping: Arc<AtomicBool>,
}

impl TerminalNode {
    /// Create connections, sessions and the listener; nothing is dialled yet
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(config: &CommsConfig, dispatcher: &Dispatcher) -> Result<Self> {
        let registry = Arc::new(MessageRegistry::with_session_messages());
        let stopping = Arc::new(AtomicBool::new(false));
        let consumer = Arc::new(TrafficLogger {
            registry: Arc::clone(&registry),
        });

        let mut connections = Vec::new();
        let mut sessions = Vec::new();
        for connection_config in &config.connections {
            let options = ConnectionOptions::try_from(connection_config)
                .with_context(|| format!("connection '{}'", connection_config.id))?;
            let observer = Arc::new(Redialer {
                host: connection_config.host.clone(),
                port: connection_config.port,
                delay: connection_config.reconnect_delay(),
                stopping: Arc::clone(&stopping),
                registry: Arc::clone(&registry),
            });
            let connection = Connection::create(dispatcher, connection_config.id.clone(), options, observer)
                .with_context(|| format!("Failed to create connection '{}'", connection_config.id))?;

            for session_config in config.sessions_for(&connection_config.id) {
                let session = Session::create(
                    dispatcher,
                    session_config.to.descriptor()?,
                    session_config.from.descriptor()?,
                    SessionOptions::from(session_config),
                    consumer.clone(),
                )?;
                connection
                    .register_session(&session)
                    .with_context(|| format!("connection '{}'", connection_config.id))?;
                debug!(connection_id = %connection_config.id, session = %session.key(), "session configured");
                sessions.push(session);
            }
            connections.push((connection, connection_config.clone()));
        }

        let listener = match &config.listener {
            Some(listener_config) => {
                let acceptor = Arc::new(InboundAcceptor {
                    dispatcher: dispatcher.clone(),
                    registry: Arc::clone(&registry),
                    accepted: Mutex::new(Vec::new()),
                });
                Some(Listener::create(dispatcher, listener_config.bind.clone(), acceptor)?)
            }
            None => None,
        };

        Ok(Self {
            dispatcher: dispatcher.clone(),
            connections,
            sessions,
            listener,
            stopping,
        })
    }

    /// Dial every connection and start listening
    pub fn start(&self) -> Result<()> {
        if let Some(listener) = &self.listener {
            let addr = listener.start().context("Failed to start listener")?;
            info!(%addr, "accepting inbound connections");
        }
        for (connection, config) in &self.connections {
            connection
                .connect(&config.host, config.port)
                .with_context(|| format!("Failed to start connection '{}'", config.id))?;
        }
        info!(
            connections = self.connections.len(),
            sessions = self.sessions.len(),
            "terminal node started"
        );
        Ok(())
    }

    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.iter().map(|(connection, _)| connection)
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|listener| listener.local_addr())
    }

    /// Stop redialling and stop the dispatcher, which closes every connection
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        for (connection, _) in &self.connections {
            let stats = connection.stats();
            info!(
                connection_id = %stats.id,
                bytes_sent = stats.bytes_sent,
                bytes_received = stats.bytes_received,
                messages_sent = stats.messages_sent,
                messages_received = stats.messages_received,
                "connection totals"
            );
        }
        self.dispatcher.stop();
    }
}
