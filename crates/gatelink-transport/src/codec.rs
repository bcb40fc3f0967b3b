//! Length-prefixed framing
//!
//! Each frame is preceded by a 4-byte big-endian length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, TransportError};
use crate::traits::FrameCodec;

/// Default maximum frame size (1MB)
pub const DEFAULT_MAX_READ_SIZE: usize = 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// The default codec stage of every filter chain
#[derive(Debug)]
pub struct LengthPrefixCodec {
    max_read_size: AtomicUsize,
}

impl LengthPrefixCodec {
    pub fn new() -> Self {
        Self::with_max_read_size(DEFAULT_MAX_READ_SIZE)
    }

    pub fn with_max_read_size(max: usize) -> Self {
        Self {
            max_read_size: AtomicUsize::new(max),
        }
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for LengthPrefixCodec {
    fn decode_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = (&buf[..LENGTH_PREFIX]).get_u32() as usize;
        let max = self.max_read_size();
        if len > max {
            return Err(TransportError::FrameTooLarge { len, max });
        }

        if buf.len() < LENGTH_PREFIX + len {
            buf.reserve(LENGTH_PREFIX + len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX);
        Ok(Some(buf.split_to(len).freeze()))
    }

    fn encode_frame(&self, payload: Bytes) -> Result<Bytes> {
        let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        })?;

        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
        frame.put_u32(len);
        frame.extend_from_slice(&payload);
        Ok(frame.freeze())
    }

    fn set_max_read_size(&self, max: usize) {
        self.max_read_size.store(max, Ordering::Relaxed);
    }

    fn max_read_size(&self) -> usize {
        self.max_read_size.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_full_frame() {
        let codec = LengthPrefixCodec::new();
        let frame = codec.encode_frame(Bytes::from_static(b"hello")).unwrap();

        let mut buf = BytesMut::from(&frame[..6]);
        assert!(codec.decode_frame(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[6..]);
        let payload = codec.decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_multiple_frames_in_one_buffer() {
        let codec = LengthPrefixCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&codec.encode_frame(Bytes::from_static(b"a")).unwrap());
        buf.extend_from_slice(&codec.encode_frame(Bytes::from_static(b"bc")).unwrap());

        assert_eq!(&codec.decode_frame(&mut buf).unwrap().unwrap()[..], b"a");
        assert_eq!(&codec.decode_frame(&mut buf).unwrap().unwrap()[..], b"bc");
        assert!(codec.decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_max_read_size_rejects_large_frame() {
        let codec = LengthPrefixCodec::with_max_read_size(4);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&codec.encode_frame(Bytes::from_static(b"12345")).unwrap());

        match codec.decode_frame(&mut buf) {
            Err(TransportError::FrameTooLarge { len, max }) => {
                assert_eq!(len, 5);
                assert_eq!(max, 4);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }

        codec.set_max_read_size(16);
        assert_eq!(codec.max_read_size(), 16);
        assert!(codec.decode_frame(&mut buf).unwrap().is_some());
    }
}
