//! # wirebus
//!
//! Lightweight message passing over pluggable transports: TCP and an
//! in-process byte-queue loopback, with three interaction patterns on
//! top of one framed byte protocol.
//!
//! ## Architecture
//!
//! - **Protocol**: 6-byte little-endian frame header, pooled send
//!   buffers, a fragmentation-tolerant framed reader.
//! - **Queues**: per-socket unbounded outbound FIFOs flushed in batches
//!   by a queue processor, preserving per-socket FIFO order.
//! - **Patterns**: publish/subscribe ([`Publisher`]/[`Subscriber`]),
//!   request/response ([`Requester`]/[`Responder`]), and a
//!   work-dispatching service queue
//!   ([`ServiceQueue`]/[`ServiceQueueReader`]) with `FirstIdle` and
//!   `LoadBalance` rotation.
//!
//! ## Example
//!
//! ```ignore
//! use wirebus::{Endpoint, MessageRegistry, Rotation, Routable, ServiceQueue, ServiceQueueReader};
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Job { id: u64 }
//!
//! impl Routable for Job {
//!     const TYPE_ID: u16 = 1;
//! }
//!
//! #[tokio::main]
//! async fn main() -> wirebus::Result<()> {
//!     let mut registry = MessageRegistry::new();
//!     registry.register::<Job>();
//!
//!     let queue = ServiceQueue::new(Rotation::LoadBalance);
//!     queue.bind(&Endpoint::inproc("/jobs")).await?;
//!
//!     let reader = ServiceQueueReader::new(std::sync::Arc::new(registry));
//!     reader.on_message(|job| println!("got job {}", job.type_id()));
//!     reader.connect(&Endpoint::inproc("/jobs")).await?;
//!
//!     queue.add_message_frame(wirebus::encode_message(&Job { id: 1 })?);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod transport;

mod patterns;
mod receive;
mod service_queue;

pub use codec::{encode_message, AnyMessage, MessageRegistry, Routable};
pub use endpoint::{Endpoint, Transport};
pub use error::{Result, WirebusError};
pub use patterns::{Publisher, Requester, Responder, ServiceQueueReader, Subscriber};
pub use protocol::MessageFrame;
pub use receive::ReceiveLoop;
pub use scheduler::{SchedulerConfig, WorkScheduler, WorkUnit, WorkUnitFactory};
pub use service_queue::{Rotation, ServiceQueue};
pub use sync::{CounterSignal, InterlockedBoolean, OnceSignal};
