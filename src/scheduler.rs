//! Work units and the bounded-elastic thread pool that runs them.
//!
//! Each decoded request becomes a work unit via an injected factory; the
//! scheduler executes units on plain threads so applications may block
//! inside them. The pool starts at `min_threads`, grows while no worker
//! is idle and the cap is not reached, and idle workers above the
//! minimum retire after a timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::codec::AnyMessage;
use crate::error::{Result, WirebusError};
use crate::protocol::MessageFrame;

/// Default idle timeout before a surplus worker retires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// One unit of request work. Executes at most once, on a pool thread.
pub trait WorkUnit: Send + 'static {
    /// Run the unit, producing the response frame.
    fn execute(self: Box<Self>) -> Result<MessageFrame>;
}

impl<F> WorkUnit for F
where
    F: FnOnce() -> Result<MessageFrame> + Send + 'static,
{
    fn execute(self: Box<Self>) -> Result<MessageFrame> {
        (*self)()
    }
}

/// Produces a work unit per decoded request message.
pub trait WorkUnitFactory: Send + Sync + 'static {
    /// Build the unit that will answer `request`.
    fn create(&self, request: AnyMessage) -> Box<dyn WorkUnit>;
}

impl<F> WorkUnitFactory for F
where
    F: Fn(AnyMessage) -> Box<dyn WorkUnit> + Send + Sync + 'static,
{
    fn create(&self, request: AnyMessage) -> Box<dyn WorkUnit> {
        self(request)
    }
}

/// Pool sizing configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Threads kept alive even when idle.
    pub min_threads: usize,
    /// Hard cap on pool size.
    pub max_threads: usize,
    /// How long a surplus worker waits for work before retiring.
    pub idle_timeout: Duration,
}

impl SchedulerConfig {
    /// Configuration with the given bounds and the default idle timeout.
    pub fn bounded(min_threads: usize, max_threads: usize) -> Self {
        Self {
            min_threads,
            max_threads,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::bounded(1, 4)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct SchedulerShared {
    receiver: Mutex<mpsc::Receiver<Job>>,
    config: SchedulerConfig,
    total: AtomicUsize,
    idle: AtomicUsize,
}

/// Thread pool executing submitted jobs exactly once each.
///
/// There is no ordering guarantee across jobs; callers that need
/// ordering enforce it themselves.
pub struct WorkScheduler {
    shared: Arc<SchedulerShared>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
}

impl WorkScheduler {
    /// Create a pool with the given bounds.
    ///
    /// # Errors
    ///
    /// Fails if `max_threads` is zero or below `min_threads`.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        if config.max_threads == 0 {
            return Err(WirebusError::InvalidArgument(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if config.min_threads > config.max_threads {
            return Err(WirebusError::InvalidArgument(format!(
                "min_threads {} exceeds max_threads {}",
                config.min_threads, config.max_threads
            )));
        }

        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(SchedulerShared {
            receiver: Mutex::new(receiver),
            config,
            total: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
        });

        for _ in 0..shared.config.min_threads {
            spawn_worker(&shared);
        }

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Submit a job for execution on some pool thread.
    ///
    /// # Errors
    ///
    /// Fails once the scheduler has been shut down.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let sender = self.sender.lock().expect("scheduler lock poisoned");
            let sender = sender.as_ref().ok_or(WirebusError::Cancelled)?;
            sender
                .send(Box::new(job))
                .map_err(|_| WirebusError::Cancelled)?;
        }

        if self.shared.idle.load(Ordering::Acquire) == 0
            && self.shared.total.load(Ordering::Acquire) < self.shared.config.max_threads
        {
            spawn_worker(&self.shared);
        }
        Ok(())
    }

    /// Current pool size, for observation in tests.
    pub fn thread_count(&self) -> usize {
        self.shared.total.load(Ordering::Acquire)
    }

    /// Stop accepting jobs and let workers drain and exit. Idempotent.
    pub fn shutdown(&self) {
        let mut sender = self.sender.lock().expect("scheduler lock poisoned");
        *sender = None;
    }
}

impl Drop for WorkScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(shared: &Arc<SchedulerShared>) {
    // Reserve a slot first so concurrent growth cannot exceed the cap.
    loop {
        let current = shared.total.load(Ordering::Acquire);
        if current >= shared.config.max_threads {
            return;
        }
        if shared
            .total
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            break;
        }
    }

    let shared = shared.clone();
    thread::spawn(move || worker_loop(shared));
}

fn worker_loop(shared: Arc<SchedulerShared>) {
    loop {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        let job = {
            let receiver = shared.receiver.lock().expect("scheduler lock poisoned");
            receiver.recv_timeout(shared.config.idle_timeout)
        };
        shared.idle.fetch_sub(1, Ordering::AcqRel);

        match job {
            Ok(job) => job(),
            Err(RecvTimeoutError::Timeout) => {
                if try_retire(&shared) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.total.fetch_sub(1, Ordering::AcqRel);
}

/// Give up this worker's slot if the pool is above its minimum.
fn try_retire(shared: &Arc<SchedulerShared>) -> bool {
    loop {
        let current = shared.total.load(Ordering::Acquire);
        if current <= shared.config.min_threads {
            return false;
        }
        if shared
            .total
            .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }
    }
}
