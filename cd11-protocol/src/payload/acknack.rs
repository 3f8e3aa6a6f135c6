use bytes::BufMut;

use crate::error::{Cd11Error, Result};
use crate::wire::{WireReader, put_fixed_str};

pub const FRAME_SET_LEN: usize = 20;

/// Acknowledgement of the sequence numbers a peer has received.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Acknack {
    /// Frame set name, e.g. `"LBTB:0"`.
    pub frame_set_acked: String,
    pub lowest_seq: u64,
    pub highest_seq: u64,
    /// Missing ranges as `(start, end)` with `end` exclusive.
    pub gap_ranges: Vec<(u64, u64)>,
}

impl Acknack {
    pub fn read(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let frame_set_acked = r.string(FRAME_SET_LEN, "frame set acked")?;
        let lowest_seq = r.u64("lowest sequence number")?;
        let highest_seq = r.u64("highest sequence number")?;
        let gap_count = r.size("gap count")?;

        // Each gap is two u64s; refuse counts the body cannot hold before allocating.
        if gap_count > r.remaining() / 16 {
            return Err(Cd11Error::Truncated {
                field: "gap ranges",
                requested: gap_count.saturating_mul(16),
                available: r.remaining(),
            });
        }
        let mut gap_ranges = Vec::with_capacity(gap_count);
        for _ in 0..gap_count {
            gap_ranges.push((r.u64("gap start")?, r.u64("gap end")?));
        }

        Ok(Self {
            frame_set_acked,
            lowest_seq,
            highest_seq,
            gap_ranges,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        put_fixed_str(out, &self.frame_set_acked, FRAME_SET_LEN);
        out.put_u64(self.lowest_seq);
        out.put_u64(self.highest_seq);
        out.put_i32(self.gap_ranges.len() as i32);
        for &(start, end) in &self.gap_ranges {
            out.put_u64(start);
            out.put_u64(end);
        }
    }
}
