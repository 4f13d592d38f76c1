//! # Event Dispatcher
//!
//! ## Purpose
//!
//! Turns concurrent I/O completions and timer expiries into strictly ordered,
//! one-at-a-time processing. Every stateful component of the CDEF stack
//! (connections, sessions, listeners) is an [`EventHandler`] registered here;
//! anything that wants to talk to it raises an event on its [`Mailbox`].
//!
//! ## Guarantees
//!
//! - No two events for the same handler are ever processed concurrently
//! - Events for one handler are processed in the order they were raised
//! - Handlers never run on the task that produced the event
//!
//! There is no ordering between different handlers' events.
//!
//! ## Model
//!
//! ```text
//! producers ──raise──► handler FIFO ──id──► ready queue ──► run() loop
//!  (any task)           (per handler)        (shared)      (single consumer)
//! ```
//!
//! For each ready id the loop drains everything queued for that handler at
//! that moment, then moves to the next id. [`Dispatcher::stop`] makes the loop
//! call `dispatcher_stop` on every registered handler and return.
//! Deregistering closes the handler's queue and discards anything left in
//! it; raises that race with deregistration either land before the discard
//! or report `false`.

pub mod dispatcher;
pub mod mailbox;

pub use dispatcher::{Dispatcher, EventHandler};
pub use mailbox::{HandlerId, Mailbox};
