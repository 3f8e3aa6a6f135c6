pub mod header;
pub mod trailer;

use std::fmt;

use bytes::{BufMut, Bytes};

use crate::error::{Cd11Error, Result};
use crate::payload::Payload;
use crate::verification;

pub use header::{FrameHeader, HEADER_LEN};
pub use trailer::{FrameTrailer, TRAILER_LEN};

/// Numeric frame type tag, the first field of every header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameType {
    ConnectionRequest,
    ConnectionResponse,
    OptionRequest,
    OptionResponse,
    Data,
    Acknack,
    Alert,
    CommandRequest,
    CommandResponse,
    CdOneEncapsulation,
    CustomReset,
}

impl FrameType {
    pub const ALL: [FrameType; 11] = [
        Self::ConnectionRequest,
        Self::ConnectionResponse,
        Self::OptionRequest,
        Self::OptionResponse,
        Self::Data,
        Self::Acknack,
        Self::Alert,
        Self::CommandRequest,
        Self::CommandResponse,
        Self::CdOneEncapsulation,
        Self::CustomReset,
    ];

    pub fn from_i32(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(Self::ConnectionRequest),
            2 => Some(Self::ConnectionResponse),
            3 => Some(Self::OptionRequest),
            4 => Some(Self::OptionResponse),
            5 => Some(Self::Data),
            6 => Some(Self::Acknack),
            7 => Some(Self::Alert),
            8 => Some(Self::CommandRequest),
            9 => Some(Self::CommandResponse),
            13 => Some(Self::CdOneEncapsulation),
            26 => Some(Self::CustomReset),
            _ => None,
        }
    }

    pub fn to_i32(self) -> i32 {
        match self {
            Self::ConnectionRequest => 1,
            Self::ConnectionResponse => 2,
            Self::OptionRequest => 3,
            Self::OptionResponse => 4,
            Self::Data => 5,
            Self::Acknack => 6,
            Self::Alert => 7,
            Self::CommandRequest => 8,
            Self::CommandResponse => 9,
            Self::CdOneEncapsulation => 13,
            Self::CustomReset => 26,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRequest => "CONNECTION_REQUEST",
            Self::ConnectionResponse => "CONNECTION_RESPONSE",
            Self::OptionRequest => "OPTION_REQUEST",
            Self::OptionResponse => "OPTION_RESPONSE",
            Self::Data => "DATA",
            Self::Acknack => "ACKNACK",
            Self::Alert => "ALERT",
            Self::CommandRequest => "COMMAND_REQUEST",
            Self::CommandResponse => "COMMAND_RESPONSE",
            Self::CdOneEncapsulation => "CD_ONE_ENCAPSULATION",
            Self::CustomReset => "CUSTOM_RESET_FRAME",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully parsed frame.
///
/// `header.frame_type` always agrees with the payload variant, and
/// `header.body_trailer_len` always matches the encoded body.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    header: FrameHeader,
    payload: Payload,
    trailer: FrameTrailer,
}

impl Frame {
    /// Assemble a frame, recomputing the header length and verification fields.
    pub fn new(header: FrameHeader, payload: Payload, trailer: FrameTrailer) -> Result<Self> {
        if header.frame_type != payload.frame_type() {
            return Err(Cd11Error::PayloadTypeMismatch {
                frame: header.frame_type.as_str(),
                payload: payload.frame_type().as_str(),
            });
        }
        Ok(Self::assemble(header, payload, trailer))
    }

    /// Build from a payload, taking the type and length fields from it.
    pub(crate) fn assemble(mut header: FrameHeader, payload: Payload, trailer: FrameTrailer) -> Self {
        let mut body = Vec::new();
        payload.write(&mut body);
        header.frame_type = payload.frame_type();
        header.body_trailer_len = (body.len() + TRAILER_LEN) as u32;
        let mut frame = Self {
            header,
            payload,
            trailer,
        };
        frame.trailer.comm_verification = verification::comm_verification(&frame.to_bytes());
        frame
    }

    /// Used by the parser, which has already checked lengths and types.
    pub(crate) fn from_parts(header: FrameHeader, payload: Payload, trailer: FrameTrailer) -> Self {
        Self {
            header,
            payload,
            trailer,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn trailer(&self) -> &FrameTrailer {
        &self.trailer
    }

    pub fn sequence_number(&self) -> u64 {
        self.header.sequence_number
    }

    /// Whether the trailer's verification value matches the CRC of the encoded frame.
    pub fn has_valid_verification(&self) -> bool {
        verification::comm_verification(&self.to_bytes()) == self.trailer.comm_verification
    }

    /// Serialize to the on-wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.payload.write(&mut body);

        let header = FrameHeader {
            body_trailer_len: (body.len() + TRAILER_LEN) as u32,
            ..self.header.clone()
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len() + TRAILER_LEN);
        header.write(&mut out);
        out.put_slice(&body);
        self.trailer.write(&mut out);
        out
    }
}

/// Bytes that could not be turned into a [`Frame`], with the reason why.
#[derive(Clone, Debug, PartialEq)]
pub struct MalformedFrame {
    pub bytes: Bytes,
    pub cause: Cd11Error,
    /// Header, when the failure happened after it was read.
    pub header: Option<FrameHeader>,
    /// Station the bytes arrived from, filled in by the receiving side.
    pub station: Option<String>,
}

impl MalformedFrame {
    pub fn new(bytes: Bytes, cause: Cd11Error) -> Self {
        Self {
            bytes,
            cause,
            header: None,
            station: None,
        }
    }

    /// Raw type tag from the first four bytes, if present.
    pub fn type_tag(&self) -> Option<i32> {
        header::peek_type(&self.bytes)
    }

    pub fn with_station(mut self, station: impl Into<String>) -> Self {
        self.station = Some(station.into());
        self
    }
}

/// Outcome of parsing one bounded slice.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOrMalformed {
    Frame(Frame),
    Malformed(MalformedFrame),
}

impl FrameOrMalformed {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Self::Frame(frame) => Some(frame.frame_type()),
            Self::Malformed(_) => None,
        }
    }

    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::Malformed(_) => None,
        }
    }
}

impl From<Frame> for FrameOrMalformed {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

impl From<MalformedFrame> for FrameOrMalformed {
    fn from(malformed: MalformedFrame) -> Self {
        Self::Malformed(malformed)
    }
}
