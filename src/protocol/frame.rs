//! Message frame and its wire header.
//!
//! A [`MessageFrame`] pairs a message type id with an opaque payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing, so broadcasting
//! one frame to many outbound queues clones a reference, not the bytes.

use bytes::Bytes;

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size (1 GB). Larger lengths in a header are
/// treated as corruption.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Decoded frame header: type id and payload length, both little-endian
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message type identifier, indexes the deserializer registry.
    pub type_id: u16,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(type_id: u16, payload_length: u32) -> Self {
        Self {
            type_id,
            payload_length,
        }
    }

    /// Encode the header to bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.type_id.to_le_bytes());
        buf[2..6].copy_from_slice(&self.payload_length.to_le_bytes());
    }

    /// Decode a header from bytes. Returns `None` if the buffer is too
    /// short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            type_id: u16::from_le_bytes([buf[0], buf[1]]),
            payload_length: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
        })
    }
}

/// A complete message frame: type id plus raw payload.
///
/// The header length always equals the payload length; the pair cannot
/// be constructed inconsistently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    type_id: u16,
    payload: Bytes,
}

impl MessageFrame {
    /// Create a frame from a type id and payload.
    pub fn new(type_id: u16, payload: Bytes) -> Self {
        Self { type_id, payload }
    }

    /// Create a frame copying the given payload bytes.
    pub fn from_slice(type_id: u16, payload: &[u8]) -> Self {
        Self {
            type_id,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Message type identifier.
    #[inline]
    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Cheap zero-copy clone of the payload.
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Wire header for this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.type_id, self.payload.len() as u32)
    }

    /// Total encoded size: header plus payload.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the complete wire image of this frame to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&self.header().encode());
        buf.extend_from_slice(&self.payload);
    }

    /// Build the complete wire image as a fresh vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = FrameHeader::new(42, 100);
        let decoded = FrameHeader::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = FrameHeader::new(0x0102, 0x0304_0506);
        let bytes = header.encode();

        // Type id: 0x0102 in LE
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], 0x01);

        // Length: 0x03040506 in LE
        assert_eq!(bytes[2], 0x06);
        assert_eq!(bytes[3], 0x05);
        assert_eq!(bytes[4], 0x04);
        assert_eq!(bytes[5], 0x03);
    }

    #[test]
    fn test_header_size_is_exactly_6() {
        assert_eq!(HEADER_SIZE, 6);
        assert_eq!(FrameHeader::new(1, 0).encode().len(), 6);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(FrameHeader::decode(&[0u8; 5]).is_none());
    }

    #[test]
    fn test_frame_encode_layout() {
        let frame = MessageFrame::from_slice(7, b"hello");
        let bytes = frame.encode();

        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        assert_eq!(&bytes[..2], &[0x07, 0x00]);
        assert_eq!(&bytes[2..6], &[5, 0, 0, 0]);
        assert_eq!(&bytes[6..], b"hello");
    }

    #[test]
    fn test_frame_header_length_matches_payload() {
        let frame = MessageFrame::from_slice(1, b"abcd");
        assert_eq!(frame.header().payload_length, 4);
        assert_eq!(frame.encoded_len(), HEADER_SIZE + 4);
    }

    #[test]
    fn test_frame_empty_payload() {
        let frame = MessageFrame::new(1, Bytes::new());
        assert_eq!(frame.encode().len(), HEADER_SIZE);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_payload_bytes_zero_copy() {
        let original = Bytes::from_static(b"shared data");
        let frame = MessageFrame::new(1, original.clone());

        let cloned = frame.payload_bytes();
        assert_eq!(cloned.as_ptr(), original.as_ptr());
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = vec![0xAA];
        MessageFrame::from_slice(1, b"x").encode_into(&mut buf);
        assert_eq!(buf[0], 0xAA);
        assert_eq!(buf.len(), 1 + HEADER_SIZE + 1);
    }
}
