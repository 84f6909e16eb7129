//! Queue processor: one worker task flushing registered queues.
//!
//! The worker waits for a signal, drains each queue with pending frames
//! into a local batch, and hands the batch to the framed writer as one
//! contiguous write. Frames added in sequence to a queue appear on the
//! wire in that order. On a write error the queue is unregistered and
//! the socket disconnected; remaining frames are dropped and higher
//! level patterns decide whether to resend.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::message_queue::MessageQueue;
use crate::protocol::write_frames;
use crate::sync::OnceSignal;
use crate::transport::Socket;

/// Callback run after a batch for a queue has been written successfully,
/// with the number of frames in the batch.
pub type FlushHook = Arc<dyn Fn(usize) + Send + Sync>;

struct Registration {
    queue: Arc<MessageQueue>,
    socket: Arc<dyn Socket>,
    on_flushed: Option<FlushHook>,
}

struct ProcessorShared {
    registrations: Mutex<Vec<Registration>>,
    signal: Arc<Notify>,
    stop: OnceSignal,
}

/// Owns the flush worker and the registry of outbound queues.
pub struct QueueProcessor {
    shared: Arc<ProcessorShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueProcessor {
    /// Create a processor and spawn its worker task.
    pub fn new() -> Self {
        let shared = Arc::new(ProcessorShared {
            registrations: Mutex::new(Vec::new()),
            signal: Arc::new(Notify::new()),
            stop: OnceSignal::new(),
        });
        let worker = tokio::spawn(worker_loop(shared.clone()));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Register a socket, returning the outbound queue now bound to it.
    ///
    /// `on_flushed` runs after each successful batch write for this
    /// queue, outside any processor lock.
    pub fn register(
        &self,
        socket: Arc<dyn Socket>,
        on_flushed: Option<FlushHook>,
    ) -> Arc<MessageQueue> {
        let queue = Arc::new(MessageQueue::new(self.shared.signal.clone()));
        self.shared
            .registrations
            .lock()
            .expect("processor registry poisoned")
            .push(Registration {
                queue: queue.clone(),
                socket,
                on_flushed,
            });
        queue
    }

    /// Remove a queue from the processor and abandon its frames.
    /// Idempotent; unknown queues are ignored.
    pub fn unregister(&self, queue: &Arc<MessageQueue>) {
        let mut registrations = self
            .shared
            .registrations
            .lock()
            .expect("processor registry poisoned");
        registrations.retain(|r| !Arc::ptr_eq(&r.queue, queue));
        drop(registrations);
        queue.abandon();
    }

    /// Stop the worker task. Idempotent and safe from any thread.
    pub fn shutdown(&self) {
        if self.shared.stop.trigger() {
            self.shared.signal.notify_waiters();
            if let Ok(mut worker) = self.worker.lock() {
                worker.take();
            }
        }
    }
}

impl Default for QueueProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QueueProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn worker_loop(shared: Arc<ProcessorShared>) {
    loop {
        let notified = shared.signal.notified();
        if shared.stop.is_set() {
            break;
        }

        let pending: Vec<(Arc<MessageQueue>, Arc<dyn Socket>, Option<FlushHook>)> = {
            let registrations = shared
                .registrations
                .lock()
                .expect("processor registry poisoned");
            registrations
                .iter()
                .filter(|r| !r.queue.is_empty())
                .map(|r| (r.queue.clone(), r.socket.clone(), r.on_flushed.clone()))
                .collect()
        };

        if pending.is_empty() {
            tokio::select! {
                _ = notified => {}
                _ = shared.stop.wait() => break,
            }
            continue;
        }

        for (queue, socket, on_flushed) in pending {
            if queue.is_abandoned() {
                continue;
            }
            let batch = queue.drain();
            if batch.is_empty() {
                continue;
            }
            match write_frames(socket.as_ref(), &batch).await {
                Ok(()) => {
                    if let Some(hook) = &on_flushed {
                        hook(batch.len());
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        endpoint = %socket.endpoint(),
                        dropped = batch.len() + queue.len(),
                        "outbound write failed: {e}"
                    );
                    let mut registrations = shared
                        .registrations
                        .lock()
                        .expect("processor registry poisoned");
                    registrations.retain(|r| !Arc::ptr_eq(&r.queue, &queue));
                    drop(registrations);
                    queue.abandon();
                    socket.disconnect();
                }
            }
        }
    }
}
