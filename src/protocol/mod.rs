//! Wire protocol: frame format, framed reading and writing.
//!
//! Each frame on the wire is a 6-byte little-endian header followed by
//! the payload:
//!
//! ```text
//! ┌──────────┬──────────┬───────────┐
//! │ Type ID  │ Length   │ Payload   │
//! │ 2 bytes  │ 4 bytes  │ N bytes   │
//! │ u16 LE   │ u32 LE   │           │
//! └──────────┴──────────┴───────────┘
//! ```
//!
//! There is no framing escape, checksum, or version byte; the transport
//! must be reliable and ordered.

mod buffer_pool;
mod frame;
mod frame_buffer;
mod reader;
mod writer;

pub use buffer_pool::PooledBuf;
pub use frame::{FrameHeader, MessageFrame, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
pub use frame_buffer::FrameBuffer;
pub use reader::FrameReader;
pub use writer::{write_frame, write_frames};
