use bytes::Bytes;
use std::sync::{Mutex, PoisonError};

use super::wake::WakeSignal;

/// State shared between query producers and the I/O loop: framed queries
/// waiting to be sent and the wake signal announcing them.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    queue: Mutex<Vec<Bytes>>,
    wake: WakeSignal,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a framed query and wakes the loop.
    pub(crate) fn push(&self, frame: Bytes) -> bool {
        if self.wake.is_closed() {
            return false;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
        self.wake.increment(1)
    }

    /// Hands every queued frame to the caller at once, in submission order.
    pub(crate) fn take_all(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn wake(&self) -> &WakeSignal {
        &self.wake
    }
}
