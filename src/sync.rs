//! Coordination primitives shared across the crate.
//!
//! Small building blocks: a test-and-set boolean that makes one-shot
//! transitions (disconnect, shutdown) idempotent, a one-shot signal that
//! tasks can await, and a counting latch that becomes set at a threshold.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Atomic boolean with test-and-set semantics.
///
/// `set()` returns the previous value, so exactly one caller observes the
/// transition from `false` to `true`.
#[derive(Debug, Default)]
pub struct InterlockedBoolean {
    value: AtomicBool,
}

impl InterlockedBoolean {
    /// Create a new flag, initially unset.
    pub fn new() -> Self {
        Self {
            value: AtomicBool::new(false),
        }
    }

    /// Set the flag, returning the previous value.
    pub fn set(&self) -> bool {
        self.value.swap(true, Ordering::AcqRel)
    }

    /// Current value.
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }
}

/// One-shot signal: `trigger` latches it, `wait` completes once latched.
///
/// Used as the disconnect state of sockets and as a stop token for
/// long-running loops. Triggering is idempotent; only the first call
/// returns `true`.
#[derive(Debug, Default)]
pub struct OnceSignal {
    fired: InterlockedBoolean,
    notify: Notify,
}

impl OnceSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the signal. Returns `true` only for the first caller.
    pub fn trigger(&self) -> bool {
        let first = !self.fired.set();
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Whether the signal has been triggered.
    pub fn is_set(&self) -> bool {
        self.fired.get()
    }

    /// Wait until the signal is triggered. Returns immediately if it
    /// already was.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Counting latch that becomes set once `current >= target`.
///
/// Increments are monotonic; the signal never resets.
#[derive(Debug)]
pub struct CounterSignal {
    current: AtomicUsize,
    target: usize,
    notify: Notify,
}

impl CounterSignal {
    /// Create a latch with the given target. A target of 0 is set from
    /// the start.
    pub fn new(target: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            target,
            notify: Notify::new(),
        }
    }

    /// Increment the counter, waking waiters when the target is reached.
    pub fn increment(&self) {
        let previous = self.current.fetch_add(1, Ordering::AcqRel);
        if previous + 1 >= self.target {
            self.notify.notify_waiters();
        }
    }

    /// Current counter value.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Whether the target has been reached.
    pub fn is_set(&self) -> bool {
        self.current() >= self.target
    }

    /// Wait until the counter reaches the target.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Wait with a timeout. Returns `true` if the target was reached.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_interlocked_boolean_single_transition() {
        let flag = InterlockedBoolean::new();
        assert!(!flag.get());
        assert!(!flag.set());
        assert!(flag.set());
        assert!(flag.set());
        assert!(flag.get());
    }

    #[test]
    fn test_once_signal_triggers_once() {
        let signal = OnceSignal::new();
        assert!(!signal.is_set());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_once_signal_wakes_waiter() {
        let signal = Arc::new(OnceSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_once_signal_wait_after_trigger() {
        let signal = OnceSignal::new();
        signal.trigger();
        signal.wait().await;
    }

    #[test]
    fn test_counter_signal_threshold() {
        let latch = CounterSignal::new(3);
        assert!(!latch.is_set());
        latch.increment();
        latch.increment();
        assert!(!latch.is_set());
        latch.increment();
        assert!(latch.is_set());
    }

    #[tokio::test]
    async fn test_counter_signal_wait() {
        let latch = Arc::new(CounterSignal::new(2));
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };
        latch.increment();
        latch.increment();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("latch should release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_counter_signal_wait_timeout_expires() {
        let latch = CounterSignal::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(20)).await);
        latch.increment();
        assert!(latch.wait_timeout(Duration::from_millis(20)).await);
    }

    #[test]
    fn test_counter_signal_zero_target_starts_set() {
        let latch = CounterSignal::new(0);
        assert!(latch.is_set());
    }
}
