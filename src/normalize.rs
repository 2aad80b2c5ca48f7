//! Raw telemetry to model-ready series.
//!
//! Normalization truncates every timestamp to the configured [`Granularity`],
//! merges observations that land in the same bucket according to the
//! [`DuplicatePolicy`] and sorts the result ascending. "First" and "last" refer
//! to the raw timestamps inside a bucket; raw observations with equal
//! timestamps keep their input order. Non-finite raw values are dropped before
//! merging.

use crate::error::{Error, Result};
use crate::series::{DuplicatePolicy, Granularity, Observation, RawObservation, Series};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Normalization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Timestamp bucket size
    #[serde(default = "default_granularity")]
    pub granularity: Granularity,
    /// Merge rule for observations sharing a bucket
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
    /// Minimum number of points the normalized series must have
    #[serde(default = "default_min_points")]
    pub min_points: usize,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
            duplicates: DuplicatePolicy::default(),
            min_points: default_min_points(),
        }
    }
}

fn default_granularity() -> Granularity {
    Granularity::Hour
}

fn default_min_points() -> usize {
    2
}

#[derive(Debug, Clone)]
pub struct SeriesNormalizer {
    config: NormalizeConfig,
}

impl SeriesNormalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    /// Converts unordered raw observations into a [`Series`].
    pub fn normalize(&self, raw: Vec<RawObservation>) -> Result<Series> {
        if raw.is_empty() {
            return Err(Error::EmptySeries);
        }

        let received = raw.len();
        let mut finite: Vec<RawObservation> =
            raw.into_iter().filter(|o| o.value.is_finite()).collect();
        if finite.len() < received {
            debug!(
                dropped = received - finite.len(),
                "dropped non-finite raw observations"
            );
        }
        if finite.is_empty() {
            return Err(Error::EmptySeries);
        }

        // Stable: equal raw timestamps keep their input order.
        finite.sort_by_key(|o| o.timestamp);

        let granularity = self.config.granularity;
        let mut points: Vec<Observation> = Vec::with_capacity(finite.len());
        let mut bucket_len = 0usize;
        let mut bucket_sum = 0.0f64;

        for obs in finite {
            let ts = granularity.truncate(obs.timestamp);
            match points.last_mut() {
                Some(last) if last.timestamp == ts => {
                    bucket_len += 1;
                    bucket_sum += obs.value;
                    match self.config.duplicates {
                        DuplicatePolicy::First => {}
                        DuplicatePolicy::Last => last.value = obs.value,
                        DuplicatePolicy::Mean => last.value = bucket_sum / bucket_len as f64,
                    }
                }
                _ => {
                    bucket_len = 1;
                    bucket_sum = obs.value;
                    points.push(Observation {
                        timestamp: ts,
                        value: obs.value,
                    });
                }
            }
        }

        if points.len() < self.config.min_points {
            return Err(Error::InsufficientData {
                required: self.config.min_points,
                actual: points.len(),
            });
        }

        debug!(
            received,
            points = points.len(),
            granularity = %granularity,
            "normalized series"
        );
        Ok(Series::from_normalized(points))
    }
}
