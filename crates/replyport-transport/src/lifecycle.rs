use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::error::{Result, TransportError};

/// Start/close bookkeeping shared by every adapter.
#[derive(Default)]
pub(crate) struct Lifecycle {
    started: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Lifecycle {
    /// Returns `Ok(true)` for the first start, `Ok(false)` for repeats.
    pub(crate) fn begin_start(&self) -> Result<bool> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(!self.started.swap(true, Ordering::SeqCst))
    }

    /// Returns true only for the call that performed the transition.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        lock(&self.tasks).push(handle);
    }

    pub(crate) fn abort_all(&self) {
        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
