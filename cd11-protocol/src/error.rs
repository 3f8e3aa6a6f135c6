#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Cd11Error {
    #[error("frame too short: expected {expected}, actual {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("unknown frame type: {0}")]
    UnknownFrameType(i32),

    #[error("invalid frame length field: {0}")]
    InvalidLength(i32),

    #[error("frame length {declared} exceeds maximum {max}")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("frame length mismatch: header declares {declared}, actual {actual}")]
    FrameLengthMismatch { declared: usize, actual: usize },

    #[error("truncated {field}: requested {requested} bytes, {available} available")]
    Truncated {
        field: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid julian date: {0:?}")]
    InvalidJulianDate(String),

    #[error("unsupported authentication value of {0} bytes")]
    UnsupportedAuthentication(i32),

    #[error("payload type {payload} does not match frame type {frame}")]
    PayloadTypeMismatch {
        frame: &'static str,
        payload: &'static str,
    },
}

impl Cd11Error {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Cd11Error>;
