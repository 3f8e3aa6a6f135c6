use bytes::BufMut;

use crate::error::Result;
use crate::wire::{WireReader, ascii, put_padded};

/// Single-option body of an option request or response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionExchange {
    pub option_type: i32,
    pub option_value: String,
}

impl OptionExchange {
    pub fn new(option_type: i32, option_value: impl Into<String>) -> Self {
        Self {
            option_type,
            option_value: option_value.into(),
        }
    }

    pub fn read(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        // Option count; only one option is ever carried.
        r.i32("option count")?;
        let option_type = r.i32("option type")?;
        let size = r.size("option size")?;
        let option_value = ascii(r.padded(size, "option value")?);
        Ok(Self {
            option_type,
            option_value,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_i32(1);
        out.put_i32(self.option_type);
        out.put_i32(self.option_value.len() as i32);
        put_padded(out, self.option_value.as_bytes());
    }
}
