//! Line-protocol encoding of forecasts.
//!
//! Each [`PredictionRow`] becomes one line:
//!
//! ```text
//! <measurement>,type=forecast yhat=<point>,yhat_lower=<lower>,yhat_upper=<upper> <unix_seconds>000000000
//! ```
//!
//! Floats use the shortest representation that round-trips (`1.0`, `1.5`,
//! `12345678.901`), so no precision is lost. Timestamps are whole Unix seconds
//! expressed in nanoseconds. A batch containing any non-finite value is
//! rejected as a whole.

use crate::error::{Error, Result};
use crate::forecast::PredictionRow;
use tracing::warn;

/// Tag key/value marking forecast points in the destination measurement.
pub const FORECAST_TAG: (&str, &str) = ("type", "forecast");

/// Predictions bound for one destination measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastBatch {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub rows: Vec<PredictionRow>,
}

impl ForecastBatch {
    /// Rows violating `lower <= point <= upper`.
    pub fn unordered_rows(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_ordered()).count()
    }
}

#[derive(Debug, Clone)]
pub struct ForecastFormatter {
    measurement: String,
}

impl ForecastFormatter {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Wraps prediction rows into a batch for this formatter's measurement.
    pub fn batch(&self, rows: Vec<PredictionRow>) -> ForecastBatch {
        ForecastBatch {
            measurement: self.measurement.clone(),
            tags: vec![(FORECAST_TAG.0.to_string(), FORECAST_TAG.1.to_string())],
            rows,
        }
    }

    /// Encodes every row of `batch`, preserving order.
    pub fn format(&self, batch: &ForecastBatch) -> Result<Vec<String>> {
        if batch.measurement.is_empty() {
            return Err(Error::InvalidArgument("measurement name is empty".into()));
        }

        let mut prefix = escape(&batch.measurement, &[',', ' ']);
        for (key, value) in &batch.tags {
            prefix.push(',');
            prefix.push_str(&escape(key, &[',', '=', ' ']));
            prefix.push('=');
            prefix.push_str(&escape(value, &[',', '=', ' ']));
        }

        let mut lines = Vec::with_capacity(batch.rows.len());
        for (index, row) in batch.rows.iter().enumerate() {
            if let Some((field, value)) = row.non_finite_field() {
                return Err(Error::MalformedRow {
                    index,
                    field,
                    value,
                });
            }
            if !row.is_ordered() {
                warn!(
                    index,
                    timestamp = %row.timestamp,
                    yhat = row.point_estimate,
                    yhat_lower = row.lower_bound,
                    yhat_upper = row.upper_bound,
                    "prediction interval does not contain the point estimate"
                );
            }
            lines.push(encode_line(&prefix, row));
        }
        Ok(lines)
    }
}

fn encode_line(prefix: &str, row: &PredictionRow) -> String {
    format!(
        "{} yhat={:?},yhat_lower={:?},yhat_upper={:?} {}000000000",
        prefix,
        row.point_estimate,
        row.lower_bound,
        row.upper_bound,
        row.timestamp.timestamp()
    )
}

/// Backslash-escapes `special` characters.
fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
