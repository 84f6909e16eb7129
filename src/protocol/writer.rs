//! Framed writer: frame assembly and single-write delivery.
//!
//! Each call assembles the complete byte image of one or more frames
//! into a pooled buffer and issues exactly one write on the socket.
//! A single frame is therefore never interleaved with other writers'
//! bytes on that socket, and a batch lands contiguously and in order.

use super::buffer_pool::PooledBuf;
use super::frame::MessageFrame;
use crate::error::Result;
use crate::transport::Socket;

/// Write one frame to the socket as a single write call.
pub async fn write_frame(socket: &dyn Socket, frame: &MessageFrame) -> Result<()> {
    let mut buf = PooledBuf::acquire();
    frame.encode_into(&mut buf);
    socket.write(&buf).await
}

/// Write a batch of frames to the socket as a single contiguous write.
///
/// An empty batch is a no-op.
pub async fn write_frames(socket: &dyn Socket, frames: &[MessageFrame]) -> Result<()> {
    if frames.is_empty() {
        return Ok(());
    }
    let mut buf = PooledBuf::acquire();
    for frame in frames {
        frame.encode_into(&mut buf);
    }
    socket.write(&buf).await
}
