//! Length-prefixed frame format.
//!
//! ```text
//! +-------------+---------------------+
//! | payload_len | payload             |
//! |   4 bytes   | payload_len bytes   |
//! +-------------+---------------------+
//! ```
//!
//! The length is an unsigned 32-bit big-endian integer. Message boundaries
//! are never inferred from the payload content.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Creates a frame holding a single big-endian `u32`.
    pub fn from_u32(value: u32) -> Self {
        Self::new(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Reads the payload as a big-endian `u32`.
    pub fn to_u32(&self) -> Result<u32, ProtocolError> {
        let bytes: [u8; 4] = self.payload.as_ref().try_into().map_err(|_| {
            ProtocolError::KeyAgreement(format!(
                "expected 4-byte integer, got {} bytes",
                self.payload.len()
            ))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len.min(u32::MAX as usize) as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload_len);
        buf.put_u32(payload_len as u32);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total_len = LENGTH_PREFIX_SIZE + payload_len as usize;
        if buf.len() < total_len {
            buf.reserve(total_len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let payload = buf.split_to(payload_len as usize).freeze();

        Ok(Some(Self { payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(Bytes::from_static(b"hello"));
        let mut buf = frame.encode().unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_prefix() {
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_incomplete_payload() {
        let mut buf = BytesMut::from(&b"\x00\x00\x00\x05abc"[..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"de");
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload.as_ref(), b"abcde");
    }

    #[test]
    fn test_frame_too_large_on_decode() {
        let mut buf = BytesMut::from(&b"\xff\xff\xff\xff"[..]);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frame_too_large_on_encode() {
        let frame = Frame::new(vec![0u8; MAX_PAYLOAD_SIZE as usize + 1]);
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(Bytes::new());
        let mut buf = frame.encode().unwrap();
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE);
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_u32_frame() {
        let frame = Frame::from_u32(256);
        assert_eq!(frame.payload.as_ref(), &[0, 0, 1, 0]);
        assert_eq!(frame.to_u32().unwrap(), 256);

        let bad = Frame::new(Bytes::from_static(b"abc"));
        assert!(bad.to_u32().is_err());
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::new(Bytes::from_static(b"one")).encode().unwrap());
        buf.extend_from_slice(&Frame::new(Bytes::from_static(b"two")).encode().unwrap());

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"one");
        assert_eq!(second.payload.as_ref(), b"two");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_split_delivery_yields_same_frame(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            split in 0usize..600,
        ) {
            let encoded = Frame::new(payload.clone()).encode().unwrap();
            let split = split.min(encoded.len());

            let mut buf = BytesMut::from(&encoded[..split]);
            let early = Frame::decode(&mut buf).unwrap();
            if split < encoded.len() {
                prop_assert!(early.is_none());
                buf.extend_from_slice(&encoded[split..]);
                let frame = Frame::decode(&mut buf).unwrap().unwrap();
                prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
            } else {
                let frame = early.unwrap();
                prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
            }
        }
    }
}
