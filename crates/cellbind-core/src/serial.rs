//! Serial date numbers.
//!
//! Hosts encode date/time values as fractional days since 1899-12-30.
//! Negative serials count whole days backwards while the fractional part
//! still moves forward within the day, so -1.25 is 1899-12-29 06:00.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Exclusive bounds of the representable serial range.
const MIN_SERIAL: f64 = -657_435.0;
const MAX_SERIAL: f64 = 2_958_466.0;

#[derive(Debug, Error, PartialEq)]
#[error("Not a legal OleAut date.")]
pub struct SerialError;

/// Serial zero: 1899-12-30 00:00:00.
pub fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Convert a serial day number to a date/time, rounded to the millisecond.
pub fn from_serial(serial: f64) -> Result<NaiveDateTime, SerialError> {
    if !(serial > MIN_SERIAL && serial < MAX_SERIAL) {
        return Err(SerialError);
    }
    let half = if serial >= 0.0 { 0.5 } else { -0.5 };
    let mut millis = (serial * MILLIS_PER_DAY as f64 + half) as i64;
    if millis < 0 {
        millis -= (millis % MILLIS_PER_DAY) * 2;
    }
    Ok(epoch() + Duration::milliseconds(millis))
}

/// Convert a date/time to its serial day number.
pub fn to_serial(dt: NaiveDateTime) -> f64 {
    let mut millis = (dt - epoch()).num_milliseconds();
    if millis < 0 {
        let frac = millis % MILLIS_PER_DAY;
        if frac != 0 {
            millis -= (MILLIS_PER_DAY + frac) * 2;
        }
    }
    millis as f64 / MILLIS_PER_DAY as f64
}
