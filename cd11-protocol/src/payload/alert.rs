use bytes::BufMut;

use crate::error::Result;
use crate::wire::{WireReader, ascii, put_padded};

/// Notice that the sender is about to close the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub message: String,
}

impl Alert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn read(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let size = r.size("alert size")?;
        let message = ascii(r.padded(size, "alert message")?);
        Ok(Self { message })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_i32(self.message.len() as i32);
        put_padded(out, self.message.as_bytes());
    }
}
