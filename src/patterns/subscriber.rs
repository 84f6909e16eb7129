//! Subscriber: connects to a publisher and surfaces broadcast messages.

use std::sync::Arc;

use super::receiver::ReceiverCore;
use crate::codec::{AnyMessage, MessageRegistry};
use crate::endpoint::Endpoint;
use crate::error::Result;

/// Receiving end of the publish/subscribe pattern.
///
/// Register the message callback before connecting; each broadcast
/// decoded through the registry is delivered to it.
pub struct Subscriber {
    core: Arc<ReceiverCore>,
}

impl Subscriber {
    /// Create a subscriber decoding through the given registry.
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            core: ReceiverCore::new(registry),
        }
    }

    /// Register the callback invoked per received message.
    pub fn on_message(&self, callback: impl Fn(AnyMessage) + Send + Sync + 'static) -> &Self {
        self.core.set_on_message(callback);
        self
    }

    /// Connect to a bound publisher endpoint.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.core.clone().connect(endpoint).await
    }

    /// Disconnect from the publisher. Fails when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        self.core.disconnect().await
    }

    /// Whether a live connection exists.
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }
}
