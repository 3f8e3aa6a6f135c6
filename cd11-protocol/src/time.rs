//! CD-1.1 20-byte ASCII timestamps (`YYYYDDD HH:MM:SS.mmm`).

use std::fmt;

use crate::error::{Cd11Error, Result};

pub const JULIAN_TIME_LEN: usize = 20;

/// A UTC timestamp expressed as year + day-of-year, as carried on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JulianTime {
    pub year: u16,
    pub day_of_year: u16,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

fn digits(s: &[u8], range: std::ops::Range<usize>) -> Option<u32> {
    let part = s.get(range)?;
    if part.is_empty() || !part.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(part.iter().fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0')))
}

fn is_leap(y: u32) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

impl JulianTime {
    /// Parse the wire representation, e.g. `"2024045 13:07:59.250"`.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || Cd11Error::InvalidJulianDate(s.to_owned());
        let b = s.as_bytes();
        if b.len() != JULIAN_TIME_LEN || b[7] != b' ' || b[10] != b':' || b[13] != b':' || b[16] != b'.'
        {
            return Err(bad());
        }

        let year = digits(b, 0..4).ok_or_else(bad)?;
        let day_of_year = digits(b, 4..7).ok_or_else(bad)?;
        let hour = digits(b, 8..10).ok_or_else(bad)?;
        let minute = digits(b, 11..13).ok_or_else(bad)?;
        let second = digits(b, 14..16).ok_or_else(bad)?;
        let millisecond = digits(b, 17..20).ok_or_else(bad)?;

        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if day_of_year == 0 || day_of_year > days_in_year || hour > 23 || minute > 59 || second > 60
        {
            return Err(bad());
        }

        Ok(Self {
            year: year as u16,
            day_of_year: day_of_year as u16,
            hour: hour as u8,
            minute: minute as u8,
            second: second as u8,
            millisecond: millisecond as u16,
        })
    }

    /// Build from milliseconds since the Unix epoch.
    pub fn from_unix_millis(millis: i64) -> Self {
        let days = millis.div_euclid(86_400_000);
        let ms_of_day = millis.rem_euclid(86_400_000);

        let mut year = 1970u32;
        let mut remaining = days;
        if remaining >= 0 {
            loop {
                let len = if is_leap(year) { 366 } else { 365 };
                if remaining < len {
                    break;
                }
                remaining -= len;
                year += 1;
            }
        } else {
            while remaining < 0 {
                year -= 1;
                remaining += if is_leap(year) { 366 } else { 365 };
            }
        }

        Self {
            year: year as u16,
            day_of_year: remaining as u16 + 1,
            hour: (ms_of_day / 3_600_000) as u8,
            minute: (ms_of_day % 3_600_000 / 60_000) as u8,
            second: (ms_of_day % 60_000 / 1000) as u8,
            millisecond: (ms_of_day % 1000) as u16,
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn unix_millis(&self) -> i64 {
        let year = u32::from(self.year);
        let mut days: i64 = 0;
        if year >= 1970 {
            for y in 1970..year {
                days += if is_leap(y) { 366 } else { 365 };
            }
        } else {
            for y in year..1970 {
                days -= if is_leap(y) { 366 } else { 365 };
            }
        }
        days += i64::from(self.day_of_year) - 1;

        days * 86_400_000
            + i64::from(self.hour) * 3_600_000
            + i64::from(self.minute) * 60_000
            + i64::from(self.second) * 1000
            + i64::from(self.millisecond)
    }
}

impl fmt::Display for JulianTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:03} {:02}:{:02}:{:02}.{:03}",
            self.year, self.day_of_year, self.hour, self.minute, self.second, self.millisecond
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let t = JulianTime::parse("2024045 13:07:59.250").unwrap();
        assert_eq!(t.year, 2024);
        assert_eq!(t.day_of_year, 45);
        assert_eq!(t.hour, 13);
        assert_eq!(t.millisecond, 250);
        assert_eq!(t.to_string(), "2024045 13:07:59.250");
    }

    #[test]
    fn rejects_bad_layout() {
        for s in [
            "",
            "2024045T13:07:59.250",
            "2024000 13:07:59.250",
            "2023366 00:00:00.000",
            "2024045 24:00:00.000",
            "2024045 13:07:59.25",
            "20240a5 13:07:59.250",
        ] {
            assert!(JulianTime::parse(s).is_err(), "{s:?} should be rejected");
        }
    }

    #[test]
    fn leap_day_366_accepted() {
        assert!(JulianTime::parse("2024366 23:59:59.999").is_ok());
    }

    #[test]
    fn unix_epoch() {
        let t = JulianTime::parse("1970001 00:00:00.000").unwrap();
        assert_eq!(t.unix_millis(), 0);
        assert_eq!(JulianTime::from_unix_millis(0), t);
    }

    #[test]
    fn unix_millis_roundtrip() {
        // 2024-02-14T13:07:59.250Z
        let millis = 1_707_916_079_250;
        let t = JulianTime::from_unix_millis(millis);
        assert_eq!(t.to_string(), "2024045 13:07:59.250");
        assert_eq!(t.unix_millis(), millis);
    }

    #[test]
    fn before_epoch() {
        let t = JulianTime::from_unix_millis(-1);
        assert_eq!(t.to_string(), "1969365 23:59:59.999");
        assert_eq!(t.unix_millis(), -1);
    }
}
