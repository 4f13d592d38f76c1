//! One-shot timers that fire into a dispatcher mailbox
//!
//! A fired timer raises its event through the same path as I/O completions,
//! so expiry is processed in order with everything else for that handler.
//! Re-arming replaces the pending expiry.

use crate::error::{NetworkError, Result};
use dispatcher::Mailbox;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Handle of the runtime the caller is running on
pub(crate) fn runtime_handle() -> Result<Handle> {
    Handle::try_current().map_err(|_| {
        NetworkError::configuration("must be created inside a tokio runtime", Some("runtime"))
    })
}

pub struct OneShotTimer {
    name: &'static str,
    runtime: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl OneShotTimer {
    pub fn new(name: &'static str, runtime: Handle) -> Self {
        Self {
            name,
            runtime,
            pending: Mutex::new(None),
        }
    }

    /// Raise `event` on `mailbox` after `delay`, cancelling any earlier arm
    pub fn arm<E: Send + 'static>(&self, delay: Duration, mailbox: &Mailbox<E>, event: E) {
        let mailbox = mailbox.clone();
        let name = self.name;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !mailbox.raise(event) {
                tracing::trace!(timer = name, "timer fired after handler went away");
            }
        });
        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }

    /// Armed and not yet fired
    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for OneShotTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotTimer")
            .field("name", &self.name)
            .field("armed", &self.is_armed())
            .finish()
    }
}
