use bytes::BufMut;

use crate::error::{Cd11Error, Result};
use crate::frame::FrameType;
use crate::wire::{WireReader, put_fixed_str};

pub const HEADER_LEN: usize = 36;

/// Byte offset of the body+trailer length field within the header.
pub const LENGTH_OFFSET: usize = 4;

pub const CREATOR_LEN: usize = 8;
pub const DESTINATION_LEN: usize = 8;

/// The fixed 36-byte prefix of every frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    /// Number of bytes after the header that belong to this frame (body + trailer).
    pub body_trailer_len: u32,
    pub frame_creator: String,
    pub frame_destination: String,
    pub sequence_number: u64,
    pub series: i32,
}

/// Peek the raw type tag without validating it.
pub fn peek_type(data: &[u8]) -> Option<i32> {
    let tag: [u8; 4] = data.get(0..4)?.try_into().ok()?;
    Some(i32::from_be_bytes(tag))
}

/// Peek the raw body+trailer length field.
pub fn peek_length(data: &[u8]) -> Option<i32> {
    let len: [u8; 4] = data.get(LENGTH_OFFSET..LENGTH_OFFSET + 4)?.try_into().ok()?;
    Some(i32::from_be_bytes(len))
}

impl FrameHeader {
    /// Parse a header from the first 36 bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Cd11Error::FrameTooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }

        let mut r = WireReader::new(&data[..HEADER_LEN]);
        let tag = r.i32("frame type")?;
        let frame_type = FrameType::from_i32(tag).ok_or(Cd11Error::UnknownFrameType(tag))?;
        let len = r.i32("body length")?;
        let body_trailer_len = u32::try_from(len).map_err(|_| Cd11Error::InvalidLength(len))?;

        Ok(Self {
            frame_type,
            body_trailer_len,
            frame_creator: r.string(CREATOR_LEN, "frame creator")?,
            frame_destination: r.string(DESTINATION_LEN, "frame destination")?,
            sequence_number: r.u64("sequence number")?,
            series: r.i32("series")?,
        })
    }

    /// Total on-wire length of the frame this header describes.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body_trailer_len as usize
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_i32(self.frame_type.to_i32());
        out.put_u32(self.body_trailer_len);
        put_fixed_str(out, &self.frame_creator, CREATOR_LEN);
        put_fixed_str(out, &self.frame_destination, DESTINATION_LEN);
        out.put_u64(self.sequence_number);
        out.put_i32(self.series);
    }
}
