//! Communication verification: CRC-64 over the encoded frame.

use crc::{CRC_64_ECMA_182, Crc};

use crate::frame::TRAILER_LEN;

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

const VERIFICATION_LEN: usize = 8;

/// Verification value for encoded `frame` bytes. The trailing verification field is read as
/// zero, so the result is the same whether or not it has been filled in.
pub fn comm_verification(frame: &[u8]) -> u64 {
    let covered = frame.len().saturating_sub(VERIFICATION_LEN);
    let mut digest = CRC64.digest();
    digest.update(&frame[..covered]);
    digest.update(&[0u8; VERIFICATION_LEN]);
    digest.finalize()
}

/// Whether `frame` bytes carry a matching verification value.
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < TRAILER_LEN {
        return false;
    }
    let stored: [u8; VERIFICATION_LEN] = frame[frame.len() - VERIFICATION_LEN..]
        .try_into()
        .unwrap_or_default();
    u64::from_be_bytes(stored) == comm_verification(frame)
}
