//! # CDEF Terminal
//!
//! Library half of the `cdef-terminal` binary: the [`TerminalNode`] that
//! wires configured connections, sessions and the listener onto one
//! dispatcher.

pub mod node;

pub use node::TerminalNode;
