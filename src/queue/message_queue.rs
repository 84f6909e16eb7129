//! Unbounded outbound FIFO bound to one socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::protocol::MessageFrame;

/// Unbounded FIFO of frames associated with exactly one outbound socket
/// while registered with a [`QueueProcessor`](super::QueueProcessor).
///
/// `enqueue` is safe from any thread and never blocks. Once the queue is
/// abandoned (writer failure or unregistration) further enqueues are
/// silently dropped; the frames had nowhere to go.
pub struct MessageQueue {
    frames: Mutex<VecDeque<MessageFrame>>,
    signal: Arc<Notify>,
    abandoned: AtomicBool,
}

impl MessageQueue {
    pub(crate) fn new(signal: Arc<Notify>) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            signal,
            abandoned: AtomicBool::new(false),
        }
    }

    /// Append a frame and signal the processor.
    pub fn enqueue(&self, frame: MessageFrame) {
        if self.abandoned.load(Ordering::Acquire) {
            return;
        }
        self.frames
            .lock()
            .expect("message queue lock poisoned")
            .push_back(frame);
        self.signal.notify_one();
    }

    /// Number of frames waiting to be flushed.
    pub fn len(&self) -> usize {
        self.frames.lock().expect("message queue lock poisoned").len()
    }

    /// Whether no frames are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every pending frame, preserving order.
    pub(crate) fn drain(&self) -> Vec<MessageFrame> {
        let mut frames = self.frames.lock().expect("message queue lock poisoned");
        frames.drain(..).collect()
    }

    /// Drop pending frames and refuse future enqueues.
    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        self.frames
            .lock()
            .expect("message queue lock poisoned")
            .clear();
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}
