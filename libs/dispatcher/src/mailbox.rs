//! Per-handler event queue and the producer handle that feeds it

use crate::dispatcher::Shared;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// Identity of a registered handler
pub type HandlerId = u64;

/// Queue state shared by a handler's mailboxes and its dispatcher slot
pub(crate) struct Queue<E> {
    state: Mutex<QueueState<E>>,
}

struct QueueState<E> {
    events: VecDeque<E>,
    open: bool,
}

impl<E> Queue<E> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                open: true,
            }),
        }
    }

    /// Push unless the queue has been closed
    fn push(&self, event: E) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            return false;
        }
        state.events.push_back(event);
        true
    }

    /// Take every event queued so far
    pub(crate) fn take_all(&self) -> VecDeque<E> {
        std::mem::take(&mut self.state.lock().events)
    }

    /// Close and drop anything still queued; returns the number discarded
    pub(crate) fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.open = false;
        let discarded = state.events.len();
        state.events.clear();
        discarded
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().events.len()
    }
}

/// Producer handle for one handler
///
/// Cheap to clone and safe to use from any thread or task. Raising on a
/// mailbox whose handler has been deregistered, or whose dispatcher is gone,
/// returns `false` and drops the event.
pub struct Mailbox<E> {
    id: HandlerId,
    queue: Arc<Queue<E>>,
    shared: Weak<Shared>,
}

impl<E: Send + 'static> Mailbox<E> {
    pub(crate) fn new(id: HandlerId, queue: Arc<Queue<E>>, shared: Weak<Shared>) -> Self {
        Self { id, queue, shared }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Queue an event for the handler and wake the dispatcher
    pub fn raise(&self, event: E) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        if !self.queue.push(event) {
            return false;
        }
        shared.mark_ready(self.id);
        true
    }

    /// Events queued and not yet taken by the dispatcher
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl<E> Clone for Mailbox<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            queue: Arc::clone(&self.queue),
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<E> fmt::Debug for Mailbox<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox").field("id", &self.id).finish()
    }
}
