//! # CDEF Network Layer
//!
//! ## Purpose
//!
//! The "plumbing" half of the CDEF stack: TCP connections with
//! length-prefixed framing, heartbeats and receive-timeout supervision,
//! sessions multiplexed over a connection, and an inbound listener.
//!
//! ## Architecture Role
//!
//! ```text
//!   socket tasks ──events──► Dispatcher loop ──► Connection ──► Session ──► SessionConsumer
//!        │                                          │
//!   FrameBuffer (framing)                     ConnectionObserver
//! ```
//!
//! Every component is a dispatcher [`dispatcher::EventHandler`]; socket
//! tasks and timers never call into owners directly, they raise events.
//! The single exception is frame routing, which runs on the receive task so
//! that session control frames are handled before the next read.
//!
//! ## Failure Model
//!
//! - A framing violation, receive timeout or I/O error closes the connection
//! - Codec errors affect one message only
//! - Reconnect policy belongs to the owner (see `services/terminal`);
//!   session retries after a rejection belong to [`Session`]

pub mod connection;
pub mod error;
pub mod framing;
pub mod listener;
pub mod session;
pub mod timer;

pub use connection::{
    Connection, ConnectionEvent, ConnectionObserver, ConnectionOptions, ConnectionState,
    ConnectionStats,
};
pub use error::{NetworkError, Result};
pub use framing::{try_extract_one, FrameBuffer};
pub use listener::{Listener, ListenerEvent, ListenerObserver};
pub use session::{Session, SessionConsumer, SessionEvent, SessionOptions};
pub use timer::OneShotTimer;
