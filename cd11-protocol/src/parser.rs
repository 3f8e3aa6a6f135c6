//! Turns one bounded slice into a [`Frame`] or a [`MalformedFrame`].

use bytes::Bytes;

use crate::decoder::DecodedSlice;
use crate::error::{Cd11Error, Result};
use crate::frame::{
    Frame, FrameHeader, FrameOrMalformed, FrameTrailer, HEADER_LEN, MalformedFrame, TRAILER_LEN,
};
use crate::payload::Payload;

/// Parse a whole frame. Never fails: structural problems come back as
/// [`FrameOrMalformed::Malformed`] carrying the input bytes.
pub fn parse(bytes: impl Into<Bytes>) -> FrameOrMalformed {
    let bytes = bytes.into();
    let header = match FrameHeader::parse(&bytes) {
        Ok(header) => header,
        Err(cause) => return MalformedFrame::new(bytes, cause).into(),
    };
    match parse_body(&header, &bytes) {
        Ok((payload, trailer)) => Frame::from_parts(header, payload, trailer).into(),
        Err(cause) => MalformedFrame {
            header: Some(header),
            ..MalformedFrame::new(bytes, cause)
        }
        .into(),
    }
}

fn parse_body(header: &FrameHeader, bytes: &[u8]) -> Result<(Payload, FrameTrailer)> {
    let len = header.frame_len();
    if bytes.len() != len {
        return Err(Cd11Error::FrameLengthMismatch {
            declared: len,
            actual: bytes.len(),
        });
    }
    let trailer_start = len
        .checked_sub(TRAILER_LEN)
        .filter(|start| *start >= HEADER_LEN)
        .ok_or(Cd11Error::FrameTooShort {
            expected: HEADER_LEN + TRAILER_LEN,
            actual: len,
        })?;

    let payload = Payload::read(header.frame_type, &bytes[HEADER_LEN..trailer_start])?;
    let trailer = FrameTrailer::parse(&bytes[trailer_start..])?;
    Ok((payload, trailer))
}

/// Parse a decoder slice; slices the decoder already rejected pass through as malformed.
pub fn parse_slice(slice: DecodedSlice) -> FrameOrMalformed {
    match slice {
        DecodedSlice::Frame(bytes) => parse(bytes),
        DecodedSlice::Malformed { bytes, cause } => MalformedFrame::new(bytes, cause).into(),
    }
}
