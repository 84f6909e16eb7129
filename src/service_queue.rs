//! Service queue: a bounded, lossless work router.
//!
//! Producers enqueue frames from any thread; remote workers connect to
//! bound endpoints and each frame is written to exactly one worker's
//! outbound queue. Frames that arrive before any worker connects are
//! retained and delivered to the first worker(s) in insertion order.
//!
//! Per-worker in-flight counts increment when the dispatcher enqueues a
//! frame and decrement when the queue processor reports the write
//! complete. `FirstIdle` only feeds workers with nothing in flight;
//! `LoadBalance` feeds the least-loaded worker, bounded by a pipeline
//! limit so one fast producer cannot bury a single worker's queue while
//! others sit empty.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::endpoint::Endpoint;
use crate::error::{Result, WirebusError};
use crate::protocol::MessageFrame;
use crate::queue::{FlushHook, MessageQueue, QueueProcessor};
use crate::sync::OnceSignal;
use crate::transport::{self, watch_remote_close, Acceptor, Socket};

/// Upper bound on frames enqueued-but-not-yet-written per worker under
/// [`Rotation::LoadBalance`].
pub const DEFAULT_MAX_PENDING_PER_WORKER: usize = 32;

/// Worker selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Dispatch only to a worker with zero frames in flight; block until
    /// one becomes idle or a new worker connects. Tie-break: earliest
    /// connected.
    FirstIdle,
    /// Dispatch to the worker with the lowest in-flight count; no worker
    /// needs to be idle. Tie-break: earliest connected.
    LoadBalance,
}

#[derive(Clone)]
struct WorkerBinding {
    seq: u64,
    socket: Arc<dyn Socket>,
    queue: Arc<MessageQueue>,
    in_flight: Arc<AtomicUsize>,
}

struct AcceptorEntry {
    acceptor: Arc<dyn Acceptor>,
    _task: JoinHandle<()>,
}

struct SqShared {
    rotation: Rotation,
    pending: Mutex<VecDeque<MessageFrame>>,
    workers: Mutex<Vec<WorkerBinding>>,
    acceptors: Mutex<HashMap<Endpoint, AcceptorEntry>>,
    processor: QueueProcessor,
    signal: Arc<Notify>,
    stop: OnceSignal,
    next_seq: AtomicU64,
}

/// Work-dispatching broker with a pluggable rotation policy.
///
/// ```ignore
/// use wirebus::{Endpoint, Rotation, ServiceQueue};
///
/// let queue = ServiceQueue::new(Rotation::LoadBalance);
/// queue.bind(&Endpoint::inproc("/jobs")).await?;
/// queue.add_message_frame(frame);
/// ```
pub struct ServiceQueue {
    shared: Arc<SqShared>,
    _dispatcher: JoinHandle<()>,
}

impl ServiceQueue {
    /// Create a service queue and start its dispatcher.
    pub fn new(rotation: Rotation) -> Self {
        let shared = Arc::new(SqShared {
            rotation,
            pending: Mutex::new(VecDeque::new()),
            workers: Mutex::new(Vec::new()),
            acceptors: Mutex::new(HashMap::new()),
            processor: QueueProcessor::new(),
            signal: Arc::new(Notify::new()),
            stop: OnceSignal::new(),
            next_seq: AtomicU64::new(0),
        });
        let dispatcher = tokio::spawn(dispatch_loop(shared.clone()));
        Self {
            shared,
            _dispatcher: dispatcher,
        }
    }

    /// Install an acceptor on the endpoint. Workers connecting through
    /// any bound endpoint join the same worker set.
    pub async fn bind(&self, endpoint: &Endpoint) -> Result<()> {
        if self.shared.stop.is_set() {
            return Err(WirebusError::ConnectionClosed);
        }
        {
            let acceptors = self.shared.acceptors.lock().expect("acceptor map poisoned");
            if acceptors.contains_key(endpoint) {
                return Err(WirebusError::AlreadyBound);
            }
        }

        let acceptor = transport::bind(endpoint).await?;
        let task = tokio::spawn(accept_loop(self.shared.clone(), acceptor.clone()));

        let mut acceptors = self.shared.acceptors.lock().expect("acceptor map poisoned");
        if acceptors.contains_key(endpoint) {
            acceptor.close();
            task.abort();
            return Err(WirebusError::AlreadyBound);
        }
        acceptors.insert(
            endpoint.clone(),
            AcceptorEntry {
                acceptor,
                _task: task,
            },
        );
        tracing::debug!(endpoint = %endpoint, "service queue bound");
        Ok(())
    }

    /// Remove the acceptor. Connected workers stay until their sockets
    /// disconnect.
    pub fn unbind(&self, endpoint: &Endpoint) -> Result<()> {
        let entry = self
            .shared
            .acceptors
            .lock()
            .expect("acceptor map poisoned")
            .remove(endpoint)
            .ok_or_else(|| {
                WirebusError::InvalidArgument(format!("endpoint {endpoint} is not bound"))
            })?;
        entry.acceptor.close();
        Ok(())
    }

    /// Enqueue a frame for dispatch. Safe from any thread; never blocks.
    pub fn add_message_frame(&self, frame: MessageFrame) {
        self.shared
            .pending
            .lock()
            .expect("pending queue poisoned")
            .push_back(frame);
        self.shared.signal.notify_one();
    }

    /// Frames accepted but not yet handed to a worker queue.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().expect("pending queue poisoned").len()
    }

    /// Currently connected workers.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().expect("worker set poisoned").len()
    }

    /// Tear everything down: close acceptors, disconnect workers, stop
    /// the dispatcher and flush worker. Idempotent and thread-safe.
    pub fn shutdown(&self) {
        if !self.shared.stop.trigger() {
            return;
        }
        let acceptors: Vec<AcceptorEntry> = {
            let mut map = self.shared.acceptors.lock().expect("acceptor map poisoned");
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in acceptors {
            entry.acceptor.close();
        }
        let workers: Vec<WorkerBinding> = {
            let mut set = self.shared.workers.lock().expect("worker set poisoned");
            set.drain(..).collect()
        };
        for worker in workers {
            self.shared.processor.unregister(&worker.queue);
            worker.socket.disconnect();
        }
        self.shared.processor.shutdown();
        self.shared.signal.notify_waiters();
    }
}

impl Drop for ServiceQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(shared: Arc<SqShared>, acceptor: Arc<dyn Acceptor>) {
    loop {
        let socket = tokio::select! {
            _ = shared.stop.wait() => break,
            accepted = acceptor.accept() => match accepted {
                Ok(socket) => socket,
                Err(_) => break,
            },
        };
        attach_worker(&shared, socket);
    }
}

fn attach_worker(shared: &Arc<SqShared>, socket: Arc<dyn Socket>) {
    if shared.stop.is_set() {
        socket.disconnect();
        return;
    }

    let seq = shared.next_seq.fetch_add(1, Ordering::AcqRel);
    let in_flight = Arc::new(AtomicUsize::new(0));

    let hook: FlushHook = {
        let in_flight = in_flight.clone();
        let signal = shared.signal.clone();
        Arc::new(move |written| {
            in_flight.fetch_sub(written, Ordering::AcqRel);
            signal.notify_one();
        })
    };
    let queue = shared.processor.register(socket.clone(), Some(hook));

    let binding = WorkerBinding {
        seq,
        socket: socket.clone(),
        queue: queue.clone(),
        in_flight,
    };
    shared
        .workers
        .lock()
        .expect("worker set poisoned")
        .push(binding);
    shared.signal.notify_one();
    tracing::debug!(seq, endpoint = %socket.endpoint(), "worker joined");

    // Workers never send application data back on this socket; draining
    // it is how we learn the remote side went away.
    let shared = shared.clone();
    tokio::spawn(async move {
        watch_remote_close(socket.clone()).await;
        let mut workers = shared.workers.lock().expect("worker set poisoned");
        workers.retain(|w| w.seq != seq);
        drop(workers);
        shared.processor.unregister(&queue);
        shared.signal.notify_one();
        tracing::debug!(seq, "worker left");
    });
}

async fn dispatch_loop(shared: Arc<SqShared>) {
    loop {
        let notified = shared.signal.notified();
        if shared.stop.is_set() {
            break;
        }

        match try_dispatch(&shared) {
            Some((frame, worker)) => {
                worker.queue.enqueue(frame);
            }
            None => {
                tokio::select! {
                    _ = notified => {}
                    _ = shared.stop.wait() => break,
                }
            }
        }
    }
}

/// Pop the head frame and pick a worker for it, or leave the frame
/// queued when no worker is eligible under the rotation policy.
fn try_dispatch(shared: &Arc<SqShared>) -> Option<(MessageFrame, WorkerBinding)> {
    let mut pending = shared.pending.lock().expect("pending queue poisoned");
    if pending.is_empty() {
        return None;
    }

    let workers = shared.workers.lock().expect("worker set poisoned");

    let selected = match shared.rotation {
        // The worker vec is in connect order, so the first idle hit is
        // also the earliest connected.
        Rotation::FirstIdle => workers
            .iter()
            .filter(|w| !w.socket.is_disconnected())
            .find(|w| w.in_flight.load(Ordering::Acquire) == 0),
        Rotation::LoadBalance => workers
            .iter()
            .filter(|w| !w.socket.is_disconnected())
            .min_by_key(|w| (w.in_flight.load(Ordering::Acquire), w.seq))
            .filter(|w| w.in_flight.load(Ordering::Acquire) < DEFAULT_MAX_PENDING_PER_WORKER),
    }?;

    let frame = pending.pop_front().expect("checked non-empty");
    selected.in_flight.fetch_add(1, Ordering::AcqRel);
    Some((frame, selected.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_double_bind_rejected() {
        let queue = ServiceQueue::new(Rotation::FirstIdle);
        let endpoint = Endpoint::inproc("/sq-double-bind");
        queue.bind(&endpoint).await.unwrap();
        assert!(matches!(
            queue.bind(&endpoint).await,
            Err(WirebusError::AlreadyBound)
        ));
    }

    #[tokio::test]
    async fn test_unbind_unknown_endpoint_fails() {
        let queue = ServiceQueue::new(Rotation::FirstIdle);
        assert!(queue.unbind(&Endpoint::inproc("/sq-never-bound")).is_err());
    }

    #[tokio::test]
    async fn test_frames_retained_without_workers() {
        let queue = ServiceQueue::new(Rotation::LoadBalance);
        for i in 0..5u16 {
            queue.add_message_frame(MessageFrame::from_slice(i, &[]));
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(queue.pending_len(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let queue = ServiceQueue::new(Rotation::FirstIdle);
        queue.bind(&Endpoint::inproc("/sq-shutdown")).await.unwrap();
        queue.shutdown();
        queue.shutdown();
    }
}
