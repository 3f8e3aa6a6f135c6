use cd11_rs_protocol::FrameType;

use crate::dispatch::HandlerError;

/// Errors from connection I/O and frame dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Close was requested; no further frames are sent.
    #[error("connection is closing")]
    Closing,

    /// `receive()` can only be called once per connection.
    #[error("connection is already being received from")]
    AlreadyReceiving,

    #[error("handler for {frame_type} failed: {source}")]
    HandlerFailed {
        frame_type: FrameType,
        #[source]
        source: HandlerError,
    },

    #[error("handler task panicked: {0}")]
    HandlerPanicked(String),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
