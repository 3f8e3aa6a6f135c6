//! Recovers frame boundaries from an append-only byte stream.

use bytes::{Bytes, BytesMut};

use crate::error::Cd11Error;
use crate::frame::header::{HEADER_LEN, peek_length, peek_type};
use crate::frame::FrameType;

/// Largest frame the decoder will wait for before giving up on the buffer.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// What the front of a buffer holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Boundary {
    /// Not enough bytes yet; consume nothing.
    Incomplete,
    /// The first `len` bytes are one frame.
    Frame { len: usize },
    /// The header cannot be trusted; the first `len` bytes (the whole buffer) are malformed.
    Malformed { len: usize, cause: Cd11Error },
}

/// Locate the first frame boundary in `buf` without consuming anything.
pub fn frame_boundary(buf: &[u8], max_frame_len: usize) -> Boundary {
    if buf.len() < HEADER_LEN {
        return Boundary::Incomplete;
    }
    let whole = |cause| Boundary::Malformed {
        len: buf.len(),
        cause,
    };

    let Some(tag) = peek_type(buf) else {
        return Boundary::Incomplete;
    };
    if FrameType::from_i32(tag).is_none() {
        return whole(Cd11Error::UnknownFrameType(tag));
    }

    let Some(len) = peek_length(buf) else {
        return Boundary::Incomplete;
    };
    let Ok(len) = usize::try_from(len) else {
        return whole(Cd11Error::InvalidLength(len));
    };
    let total = HEADER_LEN + len;
    if total > max_frame_len {
        return whole(Cd11Error::FrameTooLarge {
            declared: total,
            max: max_frame_len,
        });
    }

    if buf.len() < total {
        Boundary::Incomplete
    } else {
        Boundary::Frame { len: total }
    }
}

/// One bounded unit split off the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedSlice {
    Frame(Bytes),
    Malformed { bytes: Bytes, cause: Cd11Error },
}

/// Resumable per-connection decoder.
///
/// Bytes are appended with [`extend`](Self::extend) as they arrive and whole units are taken
/// with [`decode`](Self::decode). A partial frame stays buffered until the rest arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(HEADER_LEN * 4),
            max_frame_len,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes held but not yet emitted.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Split off the next complete unit, or `None` if more bytes are needed.
    pub fn decode(&mut self) -> Option<DecodedSlice> {
        match frame_boundary(&self.buffer, self.max_frame_len) {
            Boundary::Incomplete => None,
            Boundary::Frame { len } => Some(DecodedSlice::Frame(self.buffer.split_to(len).freeze())),
            Boundary::Malformed { len, cause } => Some(DecodedSlice::Malformed {
                bytes: self.buffer.split_to(len).freeze(),
                cause,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(tag: i32, len: i32) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&tag.to_be_bytes());
        out[4..8].copy_from_slice(&len.to_be_bytes());
        out
    }

    #[test]
    fn short_buffer_is_incomplete() {
        assert_eq!(frame_boundary(&[0u8; 35], 1024), Boundary::Incomplete);
        assert_eq!(frame_boundary(&[], 1024), Boundary::Incomplete);
    }

    #[test]
    fn known_type_waits_for_whole_frame() {
        let mut buf = header(7, 72);
        assert_eq!(frame_boundary(&buf, 1024), Boundary::Incomplete);
        buf.resize(108, 0);
        assert_eq!(frame_boundary(&buf, 1024), Boundary::Frame { len: 108 });
        buf.resize(150, 0);
        assert_eq!(frame_boundary(&buf, 1024), Boundary::Frame { len: 108 });
    }

    #[test]
    fn unknown_type_takes_whole_buffer() {
        let mut buf = header(-1, 0);
        buf.resize(100, 0xAB);
        assert_eq!(
            frame_boundary(&buf, 1024),
            Boundary::Malformed {
                len: 100,
                cause: Cd11Error::UnknownFrameType(-1)
            }
        );
    }

    #[test]
    fn negative_and_oversized_lengths() {
        let buf = header(5, -4);
        assert_eq!(
            frame_boundary(&buf, 1024),
            Boundary::Malformed {
                len: 36,
                cause: Cd11Error::InvalidLength(-4)
            }
        );
        let buf = header(5, 2000);
        assert!(matches!(
            frame_boundary(&buf, 1024),
            Boundary::Malformed {
                cause: Cd11Error::FrameTooLarge { declared: 2036, max: 1024 },
                ..
            }
        ));
    }

    #[test]
    fn decoder_keeps_remainder() {
        let mut decoder = FrameDecoder::new();
        let mut frame = header(7, 72);
        frame.resize(108, 1);
        decoder.extend(&frame);
        decoder.extend(&header(5, 100)[..20]);

        let slice = decoder.decode().unwrap();
        assert_eq!(slice, DecodedSlice::Frame(Bytes::from(frame)));
        assert_eq!(decoder.buffered(), 20);
        assert_eq!(decoder.decode(), None);
        assert_eq!(decoder.buffered(), 20);
    }

    #[test]
    fn back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        let mut a = header(6, 16);
        a.resize(52, 0);
        let mut b = header(7, 20);
        b.resize(56, 0);
        decoder.extend(&[a.clone(), b.clone()].concat());

        assert_eq!(decoder.decode(), Some(DecodedSlice::Frame(Bytes::from(a))));
        assert_eq!(decoder.decode(), Some(DecodedSlice::Frame(Bytes::from(b))));
        assert_eq!(decoder.decode(), None);
        assert_eq!(decoder.buffered(), 0);
    }
}
