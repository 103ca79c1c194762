//! In-process doorbell for waking a simulated remote.
//!
//! Mirrors the signal/wait/drain shape of a real cross-processor
//! doorbell: signals are level-like (many signals coalesce into one
//! pending state) and waiting drains the pending state.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
pub struct Doorbell {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Doorbell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ring the doorbell. Coalesces with any signal not yet consumed.
    pub fn signal(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cv.notify_all();
    }

    /// Block until signalled, then drain the pending state.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cv.wait(&mut pending);
        }
        *pending = false;
    }

    /// Like [`wait`](Self::wait) but bounded. True if a signal arrived.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            self.cv.wait_for(&mut pending, dur);
        }
        std::mem::take(&mut *pending)
    }

    /// Consume any pending signal without blocking. True if one was
    /// pending.
    pub fn drain(&self) -> bool {
        std::mem::take(&mut *self.pending.lock())
    }
}
