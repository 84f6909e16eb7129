//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a state
//! machine for handling fragmented frames:
//! - `AwaitingHeader`: need at least 6 bytes
//! - `AwaitingPayload`: header parsed, need N more payload bytes
//!
//! A socket may deliver any fragmentation of the byte stream, down to one
//! byte at a time; complete frames come out in order regardless.

use bytes::{Bytes, BytesMut};

use super::frame::{FrameHeader, MessageFrame, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::{Result, WirebusError};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header.
    AwaitingHeader,
    /// Header parsed, waiting for payload bytes.
    AwaitingPayload { header: FrameHeader },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a frame buffer with default settings (64 KiB initial
    /// capacity, 1 GB max payload).
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a frame buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::AwaitingHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error when a header announces a payload larger than the
    /// configured maximum; the stream is unrecoverable at that point.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<MessageFrame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<MessageFrame>> {
        match &self.state {
            State::AwaitingHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = FrameHeader::decode(&self.buffer[..HEADER_SIZE])
                    .expect("buffer has enough bytes");

                if header.payload_length > self.max_payload_size {
                    return Err(WirebusError::Protocol(format!(
                        "payload size {} exceeds maximum {}",
                        header.payload_length, self.max_payload_size
                    )));
                }

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.payload_length == 0 {
                    return Ok(Some(MessageFrame::new(header.type_id, Bytes::new())));
                }

                self.state = State::AwaitingPayload { header };
                self.try_extract_one()
            }

            State::AwaitingPayload { header } => {
                let needed = header.payload_length as usize;
                if self.buffer.len() < needed {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(needed).freeze();
                let type_id = header.type_id;
                self.state = State::AwaitingHeader;

                Ok(Some(MessageFrame::new(type_id, payload)))
            }
        }
    }

    /// Number of buffered bytes not yet parsed into frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no pending bytes.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::AwaitingHeader => "AwaitingHeader",
            State::AwaitingPayload { .. } => "AwaitingPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
