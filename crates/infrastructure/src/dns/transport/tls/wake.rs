use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::Notify;

/// Added by [`WakeSignal::shutdown`]. Large enough that the accumulated sum
/// stays negative under any realistic number of concurrent increments, small
/// enough that a second shutdown cannot overflow.
pub(crate) const SHUTDOWN_SENTINEL: i64 = i64::MIN / 2;

/// Cross-thread counter the I/O loop polls next to its socket.
///
/// Producers add to the counter and notify; the loop takes the accumulated
/// sum and resets it in one step. A negative sum means shutdown was
/// requested. Notifications coalesce: many increments between two polls
/// produce one wake-up carrying their total.
#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    value: AtomicI64,
    closed: AtomicBool,
    notify: Notify,
}

impl WakeSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails once the loop has exited and closed the signal.
    pub(crate) fn increment(&self, amount: i64) -> bool {
        if self.is_closed() {
            return false;
        }
        self.value.fetch_add(amount, Ordering::AcqRel);
        self.notify.notify_one();
        true
    }

    /// Always delivered, even after close.
    pub(crate) fn shutdown(&self) {
        self.value.fetch_add(SHUTDOWN_SENTINEL, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// Waits for a wake-up and returns the sum accumulated since the last one.
    ///
    /// Cancel safe: an unconsumed notification stays pending.
    pub(crate) async fn wait(&self) -> i64 {
        self.notify.notified().await;
        self.value.swap(0, Ordering::AcqRel)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
