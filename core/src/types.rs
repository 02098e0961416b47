//! Shared primitive types used across the entire pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A subscriber line identifier (MSISDN). Opaque string key.
pub type SubscriberId = String;

/// The canonical run identifier.
pub type RunId = String;

/// A calendar month in `YYYYMM` form, e.g. 202508.
///
/// Every monthly source row is tagged with the month extracted from its
/// file name; all aggregation and windowing keys on (subscriber, month).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Month(pub u32);

impl Month {
    /// Parse a 6-digit `YYYYMM` token. Rejects anything that is not six
    /// ASCII digits with a month part in 1..=12.
    pub fn parse(token: &str) -> Option<Month> {
        if token.len() != 6 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let raw: u32 = token.parse().ok()?;
        let mm = raw % 100;
        if (1..=12).contains(&mm) {
            Some(Month(raw))
        } else {
            None
        }
    }

    pub fn year(&self) -> u32 {
        self.0 / 100
    }

    pub fn month_of_year(&self) -> u32 {
        self.0 % 100
    }

    /// Linear month index (year * 12 + month). Differences between two
    /// indices give calendar-month distances regardless of year rollover.
    pub fn index(&self) -> i64 {
        (self.year() as i64) * 12 + (self.month_of_year() as i64 - 1)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}
