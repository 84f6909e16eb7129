//! Message type registry and payload serialization.
//!
//! The core moves opaque frames; attaching meaning to a type id is the
//! registry's job. Payload bytes are MessagePack, encoded and decoded
//! at the registry seam.

mod registry;

pub use registry::{encode_message, AnyMessage, MessageRegistry, Routable};
