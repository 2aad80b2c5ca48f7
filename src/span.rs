//! Compact duration literals such as `1h`, `365d` or `90m`.
//!
//! The same syntax is used in configuration files and rendered verbatim into
//! Flux queries. Pandas-style frequency aliases (`H`, `D`, `T`, `min`) are
//! accepted on input so that `frequency = "H"` keeps working.

use crate::error::{Error, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span(TimeDelta);

const UNITS: [(&str, i64); 5] = [
    ("w", 604_800),
    ("d", 86_400),
    ("h", 3_600),
    ("m", 60),
    ("s", 1),
];

impl Span {
    pub fn seconds(secs: i64) -> Self {
        Span(TimeDelta::seconds(secs))
    }

    pub fn hours(hours: i64) -> Self {
        Span(TimeDelta::hours(hours))
    }

    pub fn days(days: i64) -> Self {
        Span(TimeDelta::days(days))
    }

    pub fn as_delta(&self) -> TimeDelta {
        self.0
    }

    pub fn num_seconds(&self) -> i64 {
        self.0.num_seconds()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.num_seconds();
        if secs == 0 {
            return f.write_str("0s");
        }
        let (unit, size) = UNITS
            .iter()
            .find(|(_, size)| secs % size == 0)
            .copied()
            .unwrap_or(("s", 1));
        write!(f, "{}{}", secs / size, unit)
    }
}

impl FromStr for Span {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| Error::InvalidArgument(format!("duration '{}' has no unit", s)))?;
        let (digits, unit) = s.split_at(split);
        let count: i64 = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("invalid duration '{}'", s)))?
        };
        let size = match unit {
            "w" | "W" => 604_800,
            "d" | "D" => 86_400,
            "h" | "H" => 3_600,
            "m" | "min" | "T" => 60,
            "s" | "S" => 1,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown duration unit '{}' in '{}'",
                    other, s
                )))
            }
        };
        let secs = count
            .checked_mul(size)
            .ok_or_else(|| Error::InvalidArgument(format!("duration '{}' is too large", s)))?;
        Ok(Span(TimeDelta::seconds(secs)))
    }
}

impl Serialize for Span {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
