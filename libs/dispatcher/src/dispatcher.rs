//! Dispatcher core: handler table, ready queue and the consumer loop

use crate::mailbox::{HandlerId, Mailbox, Queue};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Stateful component driven by the dispatcher
///
/// `handle_event` is only ever called from the dispatcher loop, one event at
/// a time, in the order events were raised on the handler's mailbox. It must
/// not block; I/O belongs on separate tasks that raise events back.
pub trait EventHandler: Send + Sync + 'static {
    type Event: Send + 'static;

    fn handle_event(&self, event: Self::Event);

    /// Called once on every registered handler when the dispatcher stops
    fn dispatcher_stop(&self) {}
}

/// Type-erased view of a registered handler
trait Slot: Send + Sync {
    fn drain(&self) -> usize;
    fn stop(&self);
    fn close(&self) -> usize;
    fn pending(&self) -> usize;
}

struct HandlerSlot<H: EventHandler> {
    handler: Arc<H>,
    queue: Arc<Queue<H::Event>>,
}

impl<H: EventHandler> Slot for HandlerSlot<H> {
    fn drain(&self) -> usize {
        let events = self.queue.take_all();
        let count = events.len();
        for event in events {
            self.handler.handle_event(event);
        }
        count
    }

    fn stop(&self) {
        self.handler.dispatcher_stop();
    }

    fn close(&self) -> usize {
        self.queue.close()
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// State shared between the dispatcher handle and every mailbox
pub(crate) struct Shared {
    handlers: Mutex<HashMap<HandlerId, Arc<dyn Slot>>>,
    ready: Mutex<VecDeque<HandlerId>>,
    notify: Notify,
    stopping: AtomicBool,
    /// Set while a consumer loop owns the ready queue
    running: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn mark_ready(&self, id: HandlerId) {
        self.ready.lock().push_back(id);
        self.notify.notify_one();
    }
}

/// Single-consumer event loop
///
/// Cloning yields another handle to the same dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                handlers: Mutex::new(HashMap::new()),
                ready: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                stopping: AtomicBool::new(false),
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler built around its own mailbox
    ///
    /// The mailbox exists before the handler so the handler can keep a copy
    /// and raise events on itself. Events raised from inside `build` are
    /// delivered once registration completes.
    pub fn register<H, F>(&self, build: F) -> Arc<H>
    where
        H: EventHandler,
        F: FnOnce(Mailbox<H::Event>) -> Arc<H>,
    {
        self.install(build).0
    }

    /// Register an already-built handler and return its mailbox
    pub fn register_handler<H: EventHandler>(&self, handler: Arc<H>) -> Mailbox<H::Event> {
        self.install(|_| handler).1
    }

    fn install<H, F>(&self, build: F) -> (Arc<H>, Mailbox<H::Event>)
    where
        H: EventHandler,
        F: FnOnce(Mailbox<H::Event>) -> Arc<H>,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(Queue::new());
        let mailbox = Mailbox::new(id, Arc::clone(&queue), Arc::downgrade(&self.shared));
        let handler = build(mailbox.clone());

        let slot: Arc<dyn Slot> = Arc::new(HandlerSlot {
            handler: Arc::clone(&handler),
            queue: Arc::clone(&queue),
        });
        self.shared.handlers.lock().insert(id, slot);
        if queue.len() > 0 {
            self.shared.mark_ready(id);
        }
        debug!(handler_id = id, "handler registered");
        (handler, mailbox)
    }

    /// Remove a handler and discard its queued events
    ///
    /// Later raises on its mailboxes return `false`. Returns whether the
    /// handler was registered.
    pub fn deregister(&self, id: HandlerId) -> bool {
        let slot = self.shared.handlers.lock().remove(&id);
        match slot {
            Some(slot) => {
                let discarded = slot.close();
                debug!(handler_id = id, discarded, "handler deregistered");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: HandlerId) -> bool {
        self.shared.handlers.lock().contains_key(&id)
    }

    pub fn handler_count(&self) -> usize {
        self.shared.handlers.lock().len()
    }

    /// Events queued across all handlers
    pub fn pending_events(&self) -> usize {
        let slots: Vec<_> = self.shared.handlers.lock().values().cloned().collect();
        slots.iter().map(|slot| slot.pending()).sum()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Ask the loop to exit after the handler it is currently running
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    /// Consumer loop
    ///
    /// Pops ready handler ids in arrival order and runs every event queued
    /// for that handler before moving on. Sleeps when nothing is ready. On
    /// [`Dispatcher::stop`] every registered handler gets `dispatcher_stop`
    /// and the loop returns.
    ///
    /// Only one loop runs per dispatcher. A call made while another loop is
    /// active returns at once without touching the ready queue.
    pub async fn run(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            warn!("dispatcher loop already running, ignoring second run");
            return;
        }
        info!("dispatcher started");
        let mut processed: u64 = 0;
        loop {
            if self.is_stopping() {
                break;
            }
            let next = self.shared.ready.lock().pop_front();
            match next {
                Some(id) => processed += self.dispatch(id) as u64,
                None => self.shared.notify.notified().await,
            }
        }

        let slots: Vec<_> = self.shared.handlers.lock().values().cloned().collect();
        for slot in slots {
            slot.stop();
        }
        self.shared.running.store(false, Ordering::Release);
        info!(processed, "dispatcher stopped");
    }

    /// Run the loop on its own task
    pub fn spawn(&self) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run().await })
    }

    fn dispatch(&self, id: HandlerId) -> usize {
        let slot = self.shared.handlers.lock().get(&id).cloned();
        match slot {
            Some(slot) => slot.drain(),
            None => {
                trace!(handler_id = id, "ready id for unregistered handler");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<u32>>,
        stops: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl EventHandler for Recorder {
        type Event = u32;

        fn handle_event(&self, event: u32) {
            self.seen.lock().push(event);
        }

        fn dispatcher_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle(dispatcher: &Dispatcher) {
        for _ in 0..100 {
            if dispatcher.pending_events() == 0 {
                tokio::task::yield_now().await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_events_processed_in_order() {
        let dispatcher = Dispatcher::new();
        let recorder = Recorder::new();
        let mailbox = dispatcher.register_handler(Arc::clone(&recorder));
        let task = dispatcher.spawn();

        for i in 0..10 {
            assert!(mailbox.raise(i));
        }
        settle(&dispatcher).await;
        dispatcher.stop();
        task.await.unwrap();

        assert_eq!(*recorder.seen.lock(), (0..10).collect::<Vec<_>>());
        assert_eq!(recorder.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deregister_discards_and_rejects() {
        let dispatcher = Dispatcher::new();
        let recorder = Recorder::new();
        let mailbox = dispatcher.register_handler(Arc::clone(&recorder));

        assert!(mailbox.raise(1));
        assert!(dispatcher.deregister(mailbox.id()));
        assert!(!dispatcher.deregister(mailbox.id()));
        assert!(!mailbox.raise(2));

        let task = dispatcher.spawn();
        dispatcher.stop();
        task.await.unwrap();
        assert!(recorder.seen.lock().is_empty());
        assert_eq!(recorder.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_raise_from_builder_is_delivered() {
        let dispatcher = Dispatcher::new();
        let recorder = dispatcher.register(|mailbox: Mailbox<u32>| {
            mailbox.raise(99);
            Recorder::new()
        });
        let task = dispatcher.spawn();
        settle(&dispatcher).await;
        dispatcher.stop();
        task.await.unwrap();
        assert_eq!(*recorder.seen.lock(), vec![99]);
    }

    #[test]
    fn test_raise_after_dispatcher_dropped() {
        let dispatcher = Dispatcher::new();
        let mailbox = dispatcher.register_handler(Recorder::new());
        drop(dispatcher);
        assert!(!mailbox.raise(1));
    }
}
