use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Cd11Error;
use crate::payload::Acknack;

/// Received sequence numbers for one station, kept as merged half-open ranges.
///
/// Serializes as the list of received `[start, end)` runs in ascending order, which is
/// the form the gap state is persisted in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(u64, u64)>", into = "Vec<(u64, u64)>")]
pub struct GapList {
    /// start -> end (exclusive) of each run of received sequence numbers.
    received: BTreeMap<u64, u64>,
}

impl GapList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// Record `seq` as received. Returns `false` if it was already present.
    pub fn process(&mut self, seq: u64) -> bool {
        let Some(next) = seq.checked_add(1) else {
            // u64::MAX cannot be represented as a half-open range end.
            return false;
        };

        let mut start = seq;
        let mut end = next;
        if let Some((&s, &e)) = self.received.range(..=seq).next_back() {
            if e > seq {
                return false;
            }
            if e == seq {
                start = s;
                self.received.remove(&s);
            }
        }
        if let Some(e) = self.received.remove(&next) {
            end = e;
        }
        self.received.insert(start, end);
        true
    }

    pub fn lowest(&self) -> Option<u64> {
        self.received.keys().next().copied()
    }

    pub fn highest(&self) -> Option<u64> {
        self.received.values().next_back().map(|end| end - 1)
    }

    /// Missing ranges between the lowest and highest received, as `(start, end)` with `end`
    /// exclusive.
    pub fn gaps(&self) -> Vec<(u64, u64)> {
        self.received
            .iter()
            .zip(self.received.keys().skip(1))
            .map(|((_, &end), &next_start)| (end, next_start))
            .collect()
    }

    /// Drop everything if the peer's acknack range lies entirely below what we hold,
    /// which means the peer restarted its numbering.
    pub fn check_for_reset(&mut self, acknack: &Acknack) -> bool {
        if acknack.lowest_seq > acknack.highest_seq {
            return false;
        }
        match self.lowest() {
            Some(lowest) if acknack.highest_seq < lowest => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.received.clear();
    }

    /// The acknack reporting this list's state for `frame_set`. An empty list reports zeros.
    pub fn acknack(&self, frame_set: &str) -> Acknack {
        Acknack {
            frame_set_acked: frame_set.to_owned(),
            lowest_seq: self.lowest().unwrap_or(0),
            highest_seq: self.highest().unwrap_or(0),
            gap_ranges: self.gaps(),
        }
    }
}

impl TryFrom<Vec<(u64, u64)>> for GapList {
    type Error = Cd11Error;

    /// Runs must be non-empty, ascending, and separated by at least one missing number.
    fn try_from(runs: Vec<(u64, u64)>) -> Result<Self, Self::Error> {
        let mut received = BTreeMap::new();
        let mut previous_end = None;
        for (start, end) in runs {
            if start >= end {
                return Err(Cd11Error::invalid(
                    "gap state",
                    format!("empty run [{start}, {end})"),
                ));
            }
            if previous_end.is_some_and(|prev| start <= prev) {
                return Err(Cd11Error::invalid(
                    "gap state",
                    format!("run [{start}, {end}) overlaps or touches the previous one"),
                ));
            }
            received.insert(start, end);
            previous_end = Some(end);
        }
        Ok(Self { received })
    }
}

impl From<GapList> for Vec<(u64, u64)> {
    fn from(gaps: GapList) -> Self {
        gaps.received.into_iter().collect()
    }
}
