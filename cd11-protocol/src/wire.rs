//! Big-endian field helpers shared by the header, trailer and payload codecs.

use bytes::{Buf, BufMut, TryGetError};

use crate::error::{Cd11Error, Result};

/// Cursor over a borrowed body that reports which field ran out of bytes.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
}

fn truncated(field: &'static str, e: TryGetError) -> Cd11Error {
    Cd11Error::Truncated {
        field,
        requested: e.requested,
        available: e.available,
    }
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    pub fn i16(&mut self, field: &'static str) -> Result<i16> {
        self.buf.try_get_i16().map_err(|e| truncated(field, e))
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16> {
        self.buf.try_get_u16().map_err(|e| truncated(field, e))
    }

    pub fn i32(&mut self, field: &'static str) -> Result<i32> {
        self.buf.try_get_i32().map_err(|e| truncated(field, e))
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32> {
        self.buf.try_get_u32().map_err(|e| truncated(field, e))
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64> {
        self.buf.try_get_u64().map_err(|e| truncated(field, e))
    }

    pub fn f32(&mut self, field: &'static str) -> Result<f32> {
        self.buf.try_get_f32().map_err(|e| truncated(field, e))
    }

    /// Read an i32 size field that must not be negative.
    pub fn size(&mut self, field: &'static str) -> Result<usize> {
        let value = self.i32(field)?;
        usize::try_from(value)
            .map_err(|_| Cd11Error::invalid(field, format!("must be non-negative, got {value}")))
    }

    pub fn bytes(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Cd11Error::Truncated {
                field,
                requested: n,
                available: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Read `n` bytes followed by the NUL padding that rounds them up to a word.
    pub fn padded(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        let padded = self.bytes(padded_len(n), field)?;
        Ok(&padded[..n])
    }

    pub fn skip(&mut self, n: usize, field: &'static str) -> Result<()> {
        self.bytes(n, field).map(|_| ())
    }

    /// Read a fixed-width ASCII field, dropping NUL padding.
    pub fn string(&mut self, n: usize, field: &'static str) -> Result<String> {
        self.bytes(n, field).map(ascii)
    }
}

pub(crate) fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\0', "")
}

/// Round `n` up to the next multiple of four.
pub(crate) fn padded_len(n: usize) -> usize {
    n.div_ceil(4) * 4
}

/// Write `s` into exactly `width` bytes, truncating or NUL padding as needed.
pub(crate) fn put_fixed_str(out: &mut impl BufMut, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width);
    out.put_slice(&bytes[..n]);
    out.put_bytes(0, width - n);
}

/// Write `bytes` followed by NUL padding up to a word boundary.
pub(crate) fn put_padded(out: &mut impl BufMut, bytes: &[u8]) {
    out.put_slice(bytes);
    out.put_bytes(0, padded_len(bytes.len()) - bytes.len());
}
