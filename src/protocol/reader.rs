//! Framed reader: chunked socket reads through the frame state machine.

use std::collections::VecDeque;
use std::sync::Arc;

use super::frame::MessageFrame;
use super::frame_buffer::FrameBuffer;
use crate::error::Result;
use crate::transport::Socket;

/// Read chunk size, matching the frame buffer's initial capacity.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads complete frames from a socket, tolerating arbitrary
/// fragmentation of the underlying byte stream.
///
/// `receive` yields one frame per call; frames decoded from the same
/// chunk are held internally and handed out in order. A zero-byte read
/// ends the stream with `Ok(None)`.
pub struct FrameReader {
    socket: Arc<dyn Socket>,
    buffer: FrameBuffer,
    decoded: VecDeque<MessageFrame>,
    chunk: Vec<u8>,
}

impl FrameReader {
    /// Create a reader over the given socket.
    pub fn new(socket: Arc<dyn Socket>) -> Self {
        Self {
            socket,
            buffer: FrameBuffer::new(),
            decoded: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    /// The socket this reader consumes.
    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` on orderly end of stream, an error on I/O
    /// failure or frame corruption. Cancellation between reads is safe:
    /// dropping the future mid-read consumes no bytes.
    pub async fn receive(&mut self) -> Result<Option<MessageFrame>> {
        loop {
            if let Some(frame) = self.decoded.pop_front() {
                return Ok(Some(frame));
            }

            let n = self.socket.read(&mut self.chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoded.extend(self.buffer.push(&self.chunk[..n])?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::protocol::write_frames;
    use crate::transport;

    #[tokio::test]
    async fn test_receive_yields_frames_in_order() {
        let endpoint = Endpoint::inproc("/reader-tests");
        let acceptor = transport::bind(&endpoint).await.unwrap();
        let client = transport::connect(&endpoint).await.unwrap();
        let server = acceptor.accept().await.unwrap();

        let batch: Vec<_> = (1u16..=4)
            .map(|i| MessageFrame::from_slice(i, format!("m{i}").as_bytes()))
            .collect();
        write_frames(client.as_ref(), &batch).await.unwrap();

        let mut reader = FrameReader::new(server);
        for expected in &batch {
            let frame = reader.receive().await.unwrap().unwrap();
            assert_eq!(&frame, expected);
        }
    }

    #[tokio::test]
    async fn test_receive_none_after_peer_disconnect() {
        let endpoint = Endpoint::inproc("/reader-eof");
        let acceptor = transport::bind(&endpoint).await.unwrap();
        let client = transport::connect(&endpoint).await.unwrap();
        let server = acceptor.accept().await.unwrap();

        client.disconnect();

        let mut reader = FrameReader::new(server);
        assert!(reader.receive().await.unwrap().is_none());
    }
}
