use bytes::BufMut;

use crate::error::{Cd11Error, Result};
use crate::wire::WireReader;

pub const TRAILER_LEN: usize = 16;

/// Authentication and verification suffix of a frame.
///
/// Authentication values are not carried, so `authentication_size` is always zero
/// for a successfully parsed trailer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameTrailer {
    pub auth_key_id: i32,
    pub comm_verification: u64,
}

impl FrameTrailer {
    pub fn new(auth_key_id: i32) -> Self {
        Self {
            auth_key_id,
            comm_verification: 0,
        }
    }

    /// Parse the trailer from exactly the last `TRAILER_LEN` bytes of a frame.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != TRAILER_LEN {
            return Err(Cd11Error::FrameLengthMismatch {
                declared: TRAILER_LEN,
                actual: data.len(),
            });
        }
        let mut r = WireReader::new(data);
        let auth_key_id = r.i32("authentication key identifier")?;
        let auth_size = r.i32("authentication size")?;
        if auth_size != 0 {
            return Err(Cd11Error::UnsupportedAuthentication(auth_size));
        }
        let comm_verification = r.u64("communication verification")?;
        Ok(Self {
            auth_key_id,
            comm_verification,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_i32(self.auth_key_id);
        out.put_i32(0);
        out.put_u64(self.comm_verification);
    }
}
