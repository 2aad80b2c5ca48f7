//! Time series data model.
//!
//! A [`Series`] is the model-ready form of the telemetry: strictly ascending,
//! unique timestamps on a fixed [`Granularity`]. It can only be built through
//! [`crate::normalize::SeriesNormalizer`] or [`Series::from_sorted`], both of
//! which enforce that invariant.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single observation as returned by a telemetry source, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawObservation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl RawObservation {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A normalized observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Timestamp bucket size used when normalizing a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Bucket width in seconds.
    pub fn seconds(self) -> i64 {
        match self {
            Granularity::Minute => 60,
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
        }
    }

    pub fn step(self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    /// Truncates a timestamp down to the start of its bucket (UTC).
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.seconds();
        let secs = ts.timestamp().div_euclid(step) * step;
        // Flooring never moves a representable instant out of range.
        DateTime::from_timestamp(secs, 0).unwrap_or(ts)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        };
        f.write_str(name)
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" | "min" | "1m" | "t" => Ok(Granularity::Minute),
            "hour" | "1h" | "h" => Ok(Granularity::Hour),
            "day" | "1d" | "d" => Ok(Granularity::Day),
            other => Err(Error::InvalidArgument(format!(
                "unknown granularity '{}', expected minute, hour or day",
                other
            ))),
        }
    }
}

/// How observations that collapse onto the same truncated timestamp are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Keep the earliest raw observation of the bucket.
    First,
    /// Keep the latest raw observation of the bucket.
    Last,
    /// Average every observation in the bucket.
    #[default]
    Mean,
}

impl FromStr for DuplicatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(DuplicatePolicy::First),
            "last" => Ok(DuplicatePolicy::Last),
            "mean" | "avg" | "average" => Ok(DuplicatePolicy::Mean),
            other => Err(Error::InvalidArgument(format!(
                "unknown duplicate policy '{}', expected first, last or mean",
                other
            ))),
        }
    }
}

/// An ordered, duplicate-free series of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    points: Vec<Observation>,
}

impl Series {
    /// Builds a series from points that are already strictly ascending.
    pub fn from_sorted(points: Vec<Observation>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::EmptySeries);
        }
        if let Some(i) = points
            .windows(2)
            .position(|w| w[0].timestamp >= w[1].timestamp)
        {
            return Err(Error::InvalidArgument(format!(
                "series timestamps must be strictly ascending (offending index {})",
                i + 1
            )));
        }
        Ok(Self { points })
    }

    pub(crate) fn from_normalized(points: Vec<Observation>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.points.iter()
    }

    pub fn first(&self) -> Option<&Observation> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.points.last()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }
}
