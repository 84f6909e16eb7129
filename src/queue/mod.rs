//! Outbound message queues and the queue processor that flushes them.

mod message_queue;
mod processor;

pub use message_queue::MessageQueue;
pub use processor::{FlushHook, QueueProcessor};
