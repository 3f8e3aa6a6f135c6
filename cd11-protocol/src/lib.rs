//! CD-1.1 frame protocol: wire types, boundary decoding, and payload parsing.
//!
//! This crate has no I/O. [`FrameDecoder`] splits an incoming byte stream into bounded
//! slices, [`parser::parse`] turns each slice into a [`Frame`] or a [`MalformedFrame`], and
//! [`FrameFactory`] builds outbound frames.

pub mod decoder;
pub mod error;
pub mod factory;
pub mod frame;
pub mod gap_list;
pub mod parser;
pub mod payload;
pub mod time;
pub mod verification;
mod wire;

pub use decoder::{DecodedSlice, FrameDecoder};
pub use error::{Cd11Error, Result};
pub use factory::FrameFactory;
pub use frame::{Frame, FrameHeader, FrameOrMalformed, FrameTrailer, FrameType, MalformedFrame};
pub use gap_list::GapList;
pub use payload::Payload;
pub use time::JulianTime;
