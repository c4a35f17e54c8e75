//! One-shot shutdown handoff between the controller and the listener thread.

use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::time::{Duration, Instant};

/// Controller side. Firing consumes it, so shutdown can only be requested once.
pub struct ShutdownTrigger {
    tx: SyncSender<Instant>,
}

/// Listener side.
pub struct ShutdownSignal {
    rx: Receiver<Instant>,
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = mpsc::sync_channel(1);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    /// Requests shutdown and returns the deadline in-flight work must meet.
    pub fn fire(self, timeout: Duration) -> Instant {
        let deadline = Instant::now() + timeout;
        // the listener may already be gone, nothing left to stop then
        let _ = self.tx.send(deadline);
        deadline
    }
}

impl ShutdownSignal {
    /// Non-blocking check. A dropped trigger counts as an immediate shutdown.
    pub fn poll(&self) -> Option<Instant> {
        match self.rx.try_recv() {
            Ok(deadline) => Some(deadline),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Instant::now()),
        }
    }
}
