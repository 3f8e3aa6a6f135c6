//! Type-specific frame bodies.

pub mod acknack;
pub mod alert;
pub mod command;
pub mod connection;
pub mod data;
pub mod option;

use bytes::BufMut;

use crate::error::Result;
use crate::frame::FrameType;

pub use acknack::Acknack;
pub use alert::Alert;
pub use command::{CommandRequest, CommandResponse, CommandTarget};
pub use connection::ConnectionExchange;
pub use data::{ChannelDescription, ChannelId, ChannelSubframe, ChannelSubframeHeader, DataPayload};
pub use option::OptionExchange;

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    ConnectionRequest(ConnectionExchange),
    ConnectionResponse(ConnectionExchange),
    OptionRequest(OptionExchange),
    OptionResponse(OptionExchange),
    Data(DataPayload),
    Acknack(Acknack),
    Alert(Alert),
    CommandRequest(CommandRequest),
    CommandResponse(CommandResponse),
    CdOneEncapsulation(DataPayload),
    CustomReset(Vec<u8>),
}

impl Payload {
    /// Parse the body of a frame whose header declared `frame_type`.
    pub fn read(frame_type: FrameType, body: &[u8]) -> Result<Self> {
        Ok(match frame_type {
            FrameType::ConnectionRequest => {
                Self::ConnectionRequest(ConnectionExchange::read(body)?)
            }
            FrameType::ConnectionResponse => {
                Self::ConnectionResponse(ConnectionExchange::read(body)?)
            }
            FrameType::OptionRequest => Self::OptionRequest(OptionExchange::read(body)?),
            FrameType::OptionResponse => Self::OptionResponse(OptionExchange::read(body)?),
            FrameType::Data => Self::Data(DataPayload::read(body)?),
            FrameType::Acknack => Self::Acknack(Acknack::read(body)?),
            FrameType::Alert => Self::Alert(Alert::read(body)?),
            FrameType::CommandRequest => Self::CommandRequest(CommandRequest::read(body)?),
            FrameType::CommandResponse => Self::CommandResponse(CommandResponse::read(body)?),
            FrameType::CdOneEncapsulation => Self::CdOneEncapsulation(DataPayload::read(body)?),
            FrameType::CustomReset => Self::CustomReset(body.to_vec()),
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        match self {
            Self::ConnectionRequest(p) | Self::ConnectionResponse(p) => p.write(out),
            Self::OptionRequest(p) | Self::OptionResponse(p) => p.write(out),
            Self::Data(p) | Self::CdOneEncapsulation(p) => p.write(out),
            Self::Acknack(p) => p.write(out),
            Self::Alert(p) => p.write(out),
            Self::CommandRequest(p) => p.write(out),
            Self::CommandResponse(p) => p.write(out),
            Self::CustomReset(raw) => out.put_slice(raw),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::ConnectionRequest(_) => FrameType::ConnectionRequest,
            Self::ConnectionResponse(_) => FrameType::ConnectionResponse,
            Self::OptionRequest(_) => FrameType::OptionRequest,
            Self::OptionResponse(_) => FrameType::OptionResponse,
            Self::Data(_) => FrameType::Data,
            Self::Acknack(_) => FrameType::Acknack,
            Self::Alert(_) => FrameType::Alert,
            Self::CommandRequest(_) => FrameType::CommandRequest,
            Self::CommandResponse(_) => FrameType::CommandResponse,
            Self::CdOneEncapsulation(_) => FrameType::CdOneEncapsulation,
            Self::CustomReset(_) => FrameType::CustomReset,
        }
    }

    /// The data body of a DATA or CD-1 encapsulation frame.
    pub fn as_data(&self) -> Option<&DataPayload> {
        match self {
            Self::Data(p) | Self::CdOneEncapsulation(p) => Some(p),
            _ => None,
        }
    }
}
