//! Service-queue reader: a remote worker receiving dispatched frames.

use std::sync::Arc;

use super::receiver::ReceiverCore;
use crate::codec::{AnyMessage, MessageRegistry};
use crate::endpoint::Endpoint;
use crate::error::Result;

/// Worker-side client of a [`ServiceQueue`](crate::ServiceQueue).
///
/// Connecting joins the queue's worker set; every frame dispatched to
/// this worker arrives through the message callback. A reader may
/// disconnect and connect again to the same endpoint and resume
/// receiving newly added frames.
pub struct ServiceQueueReader {
    core: Arc<ReceiverCore>,
}

impl ServiceQueueReader {
    /// Create a reader decoding through the given registry.
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            core: ReceiverCore::new(registry),
        }
    }

    /// Register the callback invoked per dispatched message.
    pub fn on_message(&self, callback: impl Fn(AnyMessage) + Send + Sync + 'static) -> &Self {
        self.core.set_on_message(callback);
        self
    }

    /// Connect to a bound service-queue endpoint.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.core.clone().connect(endpoint).await
    }

    /// Leave the worker set. Frames already in flight to this worker are
    /// discarded by the queue.
    pub async fn disconnect(&self) -> Result<()> {
        self.core.disconnect().await
    }

    /// Whether a live connection exists.
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }
}
