//! # TCP Listener
//!
//! ## Purpose
//!
//! Accepts inbound TCP connections on a bound address and hands each socket
//! to its owner, who normally wraps it with [`Connection::accepted`].
//! Accept errors end the accept loop and are reported once; the listener
//! can then be started again.
//!
//! [`Connection::accepted`]: crate::connection::Connection::accepted

use crate::error::{NetworkError, Result};
use crate::timer::runtime_handle;
use dispatcher::{Dispatcher, EventHandler, HandlerId, Mailbox};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Owner callbacks, delivered on the dispatcher loop
pub trait ListenerObserver: Send + Sync + 'static {
    fn new_connection(&self, listener: &Listener, stream: TcpStream, peer: SocketAddr);

    fn listen_error(&self, _listener: &Listener, _error: &NetworkError) {}
}

#[derive(Debug)]
pub enum ListenerEvent {
    NewConnection { stream: TcpStream, peer: SocketAddr },
    ListenError(NetworkError),
}

struct ListenState {
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

pub struct Listener {
    bind: String,
    observer: Arc<dyn ListenerObserver>,
    mailbox: Mailbox<ListenerEvent>,
    runtime: Handle,
    state: Mutex<ListenState>,
}

impl Listener {
    /// New listener for `bind` (`host:port`); nothing is bound until [`Listener::start`]
    pub fn create(
        dispatcher: &Dispatcher,
        bind: impl Into<String>,
        observer: Arc<dyn ListenerObserver>,
    ) -> Result<Arc<Self>> {
        let runtime = runtime_handle()?;
        let bind = bind.into();
        Ok(dispatcher.register(move |mailbox| {
            Arc::new(Listener {
                bind,
                observer,
                mailbox,
                runtime,
                state: Mutex::new(ListenState {
                    local_addr: None,
                    accept_task: None,
                }),
            })
        }))
    }

    /// Bind and start accepting; returns the bound address
    ///
    /// Starting a listener that is already listening is an error. A
    /// listener whose accept loop has ended binds afresh.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut state = self.state.lock();
        if state
            .accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            let error = NetworkError::Io {
                message: format!("Listener already started on {}", self.bind),
                source: io::Error::new(io::ErrorKind::AddrInUse, "already listening"),
            };
            self.report(&error);
            return Err(error);
        }

        let listener = match self.bind_socket() {
            Ok(listener) => listener,
            Err(error) => {
                self.report(&error);
                return Err(error);
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::io("Failed to read bound address", e))?;

        info!(bind = %self.bind, %local_addr, "TCP listener started");
        let mailbox = self.mailbox.clone();
        state.local_addr = Some(local_addr);
        state.accept_task = Some(self.runtime.spawn(accept_loop(listener, mailbox)));
        Ok(local_addr)
    }

    fn bind_socket(&self) -> Result<TcpListener> {
        let std_listener = std::net::TcpListener::bind(self.bind.as_str())
            .map_err(|e| NetworkError::io(format!("Failed to bind {}", self.bind), e))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| NetworkError::io("Failed to set listener non-blocking", e))?;
        let _guard = self.runtime.enter();
        TcpListener::from_std(std_listener)
            .map_err(|e| NetworkError::io("Failed to register listener", e))
    }

    fn report(&self, error: &NetworkError) {
        error!(bind = %self.bind, error = %error, "listen error");
        self.mailbox.raise(ListenerEvent::ListenError(copy_error(error)));
    }

    /// Stop accepting; returns `false` if the listener was not running
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        state.local_addr = None;
        match state.accept_task.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                info!(bind = %self.bind, "TCP listener stopped");
                true
            }
            _ => false,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.state
            .lock()
            .accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn handler_id(&self) -> HandlerId {
        self.mailbox.id()
    }
}

impl EventHandler for Listener {
    type Event = ListenerEvent;

    fn handle_event(&self, event: ListenerEvent) {
        match event {
            ListenerEvent::NewConnection { stream, peer } => {
                debug!(%peer, "accepted TCP connection");
                self.observer.new_connection(self, stream, peer);
            }
            ListenerEvent::ListenError(error) => self.observer.listen_error(self, &error),
        }
    }

    fn dispatcher_stop(&self) {
        self.stop();
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("bind", &self.bind)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, mailbox: Mailbox<ListenerEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if !mailbox.raise(ListenerEvent::NewConnection { stream, peer }) {
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "accept failed, listener stopping");
                mailbox.raise(ListenerEvent::ListenError(NetworkError::io("Accept failed", e)));
                return;
            }
        }
    }
}

/// `io::Error` is not `Clone`; keep the kind and message
fn copy_error(error: &NetworkError) -> NetworkError {
    match error {
        NetworkError::Io { message, source } => NetworkError::Io {
            message: message.clone(),
            source: io::Error::new(source.kind(), source.to_string()),
        },
        other => NetworkError::configuration(other.to_string(), None),
    }
}
