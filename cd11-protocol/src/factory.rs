use std::sync::atomic::{AtomicU64, Ordering};

use crate::frame::{Frame, FrameHeader, FrameTrailer};
use crate::payload::{Acknack, Alert, ConnectionExchange, OptionExchange, Payload};

pub const DEFAULT_AUTH_KEY_ID: i32 = 7;

/// Wraps outbound payloads into frames from one sender.
///
/// Sequence numbers start at zero and increase by one per frame, across all payload types.
#[derive(Debug)]
pub struct FrameFactory {
    auth_key_id: i32,
    creator: String,
    destination: String,
    next_sequence: AtomicU64,
}

impl FrameFactory {
    pub fn new(creator: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            auth_key_id: DEFAULT_AUTH_KEY_ID,
            creator: creator.into(),
            destination: destination.into(),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn with_auth_key_id(mut self, auth_key_id: i32) -> Self {
        self.auth_key_id = auth_key_id;
        self
    }

    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn wrap(&self, payload: Payload) -> Frame {
        let header = FrameHeader {
            frame_type: payload.frame_type(),
            body_trailer_len: 0,
            frame_creator: self.creator.clone(),
            frame_destination: self.destination.clone(),
            sequence_number: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            series: 0,
        };
        Frame::assemble(header, payload, FrameTrailer::new(self.auth_key_id))
    }

    /// Answer an option request by echoing its option as a response.
    pub fn wrap_response(&self, request: OptionExchange) -> Frame {
        self.wrap(Payload::OptionResponse(request))
    }

    /// Answer a connection request with the address the station should connect to.
    pub fn wrap_connection_response(&self, response: ConnectionExchange) -> Frame {
        self.wrap(Payload::ConnectionResponse(response))
    }

    pub fn wrap_acknack(&self, acknack: Acknack) -> Frame {
        self.wrap(Payload::Acknack(acknack))
    }

    pub fn wrap_alert(&self, message: impl Into<String>) -> Frame {
        self.wrap(Payload::Alert(Alert::new(message)))
    }
}
