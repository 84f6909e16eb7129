//! Type-id-indexed message registry.
//!
//! A [`Routable`] type declares its wire type id as an associated
//! constant. The registry maps type ids to decoders; the receive loop
//! looks frames up here and hands decoded [`AnyMessage`] values to the
//! application, which downcasts them back to the registered type.
//!
//! Payloads cross the wire as MessagePack via `rmp-serde`; this module
//! is the only place that touches the serialization format.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, WirebusError};
use crate::protocol::MessageFrame;

/// Ties a message type to its wire type id.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use wirebus::Routable;
///
/// #[derive(Serialize, Deserialize)]
/// struct Job {
///     id: u64,
/// }
///
/// impl Routable for Job {
///     const TYPE_ID: u16 = 10;
/// }
/// ```
pub trait Routable: Serialize + Send + Sync {
    /// Wire type id carried in the frame header.
    const TYPE_ID: u16;
}

/// A decoded message: the wire type id plus the deserialized value.
///
/// Cheap to clone; the value is shared behind an `Arc`.
#[derive(Clone)]
pub struct AnyMessage {
    type_id: u16,
    inner: Arc<dyn Any + Send + Sync>,
}

impl AnyMessage {
    /// Wire type id this message was decoded from.
    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    /// Borrow the value as its registered concrete type.
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<AnyMessage> + Send + Sync>;

/// Registry mapping wire type ids to payload decoders.
#[derive(Default)]
pub struct MessageRegistry {
    decoders: HashMap<u16, DecodeFn>,
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type under its [`Routable::TYPE_ID`].
    ///
    /// Re-registering a type id replaces the previous decoder.
    pub fn register<T>(&mut self)
    where
        T: Routable + DeserializeOwned + Send + Sync + 'static,
    {
        self.decoders.insert(
            T::TYPE_ID,
            Arc::new(|bytes| {
                let value: T = rmp_serde::from_slice(bytes)?;
                Ok(AnyMessage {
                    type_id: T::TYPE_ID,
                    inner: Arc::new(value),
                })
            }),
        );
    }

    /// Whether a decoder exists for the type id.
    pub fn is_registered(&self, type_id: u16) -> bool {
        self.decoders.contains_key(&type_id)
    }

    /// Decode a frame's payload through the registered decoder.
    pub fn decode_frame(&self, frame: &MessageFrame) -> Result<AnyMessage> {
        let decode = self
            .decoders
            .get(&frame.type_id())
            .ok_or(WirebusError::UnknownMessageType(frame.type_id()))?;
        decode(frame.payload())
    }
}

/// Encode a routable message into a frame carrying its type id.
pub fn encode_message<T: Routable>(message: &T) -> Result<MessageFrame> {
    let payload = rmp_serde::to_vec_named(message)?;
    Ok(MessageFrame::new(T::TYPE_ID, Bytes::from(payload)))
}
