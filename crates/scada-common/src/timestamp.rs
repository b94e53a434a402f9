//! Spreadsheet-style serial date encoding used by the snapshot codec (spec §4.1).
//!
//! A single `f64`: whole part is days since the epoch 1899-12-30, fractional
//! part is the time of day. This is the "OLE Automation date" convention,
//! chosen because it is exactly the "classic spreadsheet-style serial date"
//! the spec names and gives the valid range `[1, 2_958_465]` for.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

const EPOCH_YEAR: i32 = 1899;
const EPOCH_MONTH: u32 = 12;
const EPOCH_DAY: u32 = 30;

pub const MIN_SERIAL: f64 = 1.0;
pub const MAX_SERIAL: f64 = 2_958_465.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("serial timestamp {0} is NaN or infinite")]
    NotFinite(String),
    #[error("serial timestamp {0} is outside the valid range [{MIN_SERIAL}, {MAX_SERIAL}]")]
    OutOfRange(f64),
}

/// A validated serial timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SerialTime(f64);

impl SerialTime {
    pub fn new(raw: f64) -> Result<Self, TimestampError> {
        if !raw.is_finite() {
            return Err(TimestampError::NotFinite(raw.to_string()));
        }
        if !(MIN_SERIAL..=MAX_SERIAL).contains(&raw) {
            return Err(TimestampError::OutOfRange(raw));
        }
        Ok(Self(raw))
    }

    pub fn raw(&self) -> f64 {
        self.0
    }

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(EPOCH_YEAR, EPOCH_MONTH, EPOCH_DAY)
            .expect("epoch constant is a valid date")
    }

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        let days = (dt.date() - Self::epoch()).num_days() as f64;
        let frac = (dt.num_seconds_from_midnight() as f64
            + dt.nanosecond() as f64 / 1_000_000_000.0)
            / 86_400.0;
        Self(days + frac)
    }

    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let days = self.0.floor() as i64;
        let frac = self.0 - self.0.floor();
        let date = Self::epoch().checked_add_signed(chrono::Duration::days(days))?;
        let secs_f = frac * 86_400.0;
        let secs = secs_f.floor() as u32;
        let nanos = ((secs_f - secs.floor() as f64) * 1_000_000_000.0).round() as u32;
        date.and_hms_nano_opt(secs / 3600, (secs % 3600) / 60, secs % 60, nanos)
    }

    /// Day-boundary date, used as the cache/archive-file key (spec §4.2).
    pub fn date(&self) -> Option<NaiveDate> {
        self.to_datetime().map(|dt| dt.date())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn rejects_nan_and_infinity() {
        assert!(SerialTime::new(f64::NAN).is_err());
        assert!(SerialTime::new(f64::INFINITY).is_err());
        assert!(SerialTime::new(f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(SerialTime::new(0.0).is_err());
        assert!(SerialTime::new(MAX_SERIAL + 1.0).is_err());
    }

    #[test]
    fn round_trips_through_datetime() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        let st = SerialTime::from_datetime(dt);
        assert!(SerialTime::new(st.raw()).is_ok());
        let back = st.to_datetime().unwrap();
        assert_eq!(back.date(), dt.date());
        assert_eq!(back.hour(), dt.hour());
        assert_eq!(back.minute(), dt.minute());
    }

    #[test]
    fn year_1900_is_near_serial_one() {
        let dt = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let st = SerialTime::from_datetime(dt);
        assert!(st.raw() >= MIN_SERIAL && st.raw() < 3.0);
    }
}
