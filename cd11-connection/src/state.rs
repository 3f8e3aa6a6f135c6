use std::time::Duration;

use cd11_rs_protocol::decoder::DEFAULT_MAX_FRAME_LEN;

/// Connection lifecycle.
///
/// Transitions: `Open` → `Closing` → `Closed`. `Closing` is entered by the first
/// [`close()`](crate::Connection::close); `Closed` once the transport has released the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }
}

/// Options for a [`Connection`](crate::Connection).
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Largest frame accepted before the buffer is treated as malformed. Default: 8 MiB.
    pub max_frame_len: usize,
    /// Bytes requested per socket read. Default: 16 KiB.
    pub read_chunk_size: usize,
    /// How long release waits for an in-flight write before giving up on it. Default: 5 s.
    pub release_timeout: Duration,
    /// How long a closing session's handlers may spend on frames already received.
    /// Default: 5 s.
    pub drain_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_chunk_size: 16 * 1024,
            release_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
        }
    }
}
