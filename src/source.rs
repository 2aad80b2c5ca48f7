//! Telemetry source contract and the Flux/annotated-CSV codec behind it.

use crate::error::{Error, Result};
use crate::series::RawObservation;
use crate::span::Span;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Aggregation applied per window before the series is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    #[default]
    Mean,
    Median,
    Min,
    Max,
    First,
    Last,
    Sum,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::Mean => "mean",
            AggregateFunction::Median => "median",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::First => "first",
            AggregateFunction::Last => "last",
            AggregateFunction::Sum => "sum",
        };
        f.write_str(name)
    }
}

/// Which series to pull from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// Optional `_field` restriction
    #[serde(default)]
    pub field: Option<String>,
    /// Tag identifying the entity, e.g. the Ceph `fsid`
    #[serde(default = "default_entity_tag")]
    pub entity_tag: String,
    #[serde(default)]
    pub entity: String,
    /// Additional tag equality predicates
    #[serde(default = "default_filters")]
    pub filters: BTreeMap<String, String>,
    #[serde(default = "default_lookback")]
    pub lookback: Span,
    #[serde(default = "default_aggregate_every")]
    pub aggregate_every: Span,
    #[serde(default)]
    pub aggregate_fn: AggregateFunction,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            measurement: default_measurement(),
            field: None,
            entity_tag: default_entity_tag(),
            entity: String::new(),
            filters: default_filters(),
            lookback: default_lookback(),
            aggregate_every: default_aggregate_every(),
            aggregate_fn: AggregateFunction::default(),
        }
    }
}

impl SourceConfig {
    /// The query for this source against `bucket`.
    pub fn query(&self, bucket: &str) -> SeriesQuery {
        let mut predicates: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        predicates.push((self.entity_tag.clone(), self.entity.clone()));
        SeriesQuery {
            bucket: bucket.to_string(),
            measurement: self.measurement.clone(),
            field: self.field.clone(),
            predicates,
            lookback: self.lookback,
            aggregate_every: self.aggregate_every,
            aggregate_fn: self.aggregate_fn,
        }
    }
}

fn default_measurement() -> String {
    "ceph_cluster_stats".to_string()
}

fn default_entity_tag() -> String {
    "fsid".to_string()
}

fn default_filters() -> BTreeMap<String, String> {
    BTreeMap::from([("type_instance".to_string(), "data_bytes".to_string())])
}

fn default_lookback() -> Span {
    Span::days(365)
}

fn default_aggregate_every() -> Span {
    Span::hours(1)
}

/// A windowed, aggregated series request.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub bucket: String,
    pub measurement: String,
    pub field: Option<String>,
    /// Tag equality predicates, all of which must hold
    pub predicates: Vec<(String, String)>,
    pub lookback: Span,
    pub aggregate_every: Span,
    pub aggregate_fn: AggregateFunction,
}

impl SeriesQuery {
    /// Renders the request as a Flux script.
    pub fn to_flux(&self) -> String {
        let mut filter = format!("r._measurement == {}", flux_string(&self.measurement));
        if let Some(field) = &self.field {
            filter.push_str(&format!(" and r._field == {}", flux_string(field)));
        }
        for (key, value) in &self.predicates {
            filter.push_str(&format!(" and {} == {}", flux_column(key), flux_string(value)));
        }
        format!(
            "from(bucket: {})\n  |> range(start: -{})\n  |> filter(fn: (r) => {})\n  |> aggregateWindow(fn: {}, every: {}, createEmpty: false)",
            flux_string(&self.bucket),
            self.lookback,
            filter,
            self.aggregate_fn,
            self.aggregate_every
        )
    }
}

/// A store the pipeline can read telemetry from.
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// Returns every `(timestamp, value)` pair matching `query`, in any order.
    async fn fetch(&self, query: &SeriesQuery) -> Result<Vec<RawObservation>>;
}

fn flux_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn flux_column(key: &str) -> String {
    let is_identifier = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_identifier {
        format!("r.{}", key)
    } else {
        format!("r[{}]", flux_string(key))
    }
}

/// Decodes an InfluxDB annotated-CSV query response into observations.
///
/// Each table starts with a header row naming `_time` and `_value`, after
/// optional `#` annotation rows. Quoted cells may span lines. Rows with an
/// empty `_value` are skipped. An `error` table is turned into
/// [`Error::Source`].
pub fn decode_annotated_csv(body: &str) -> Result<Vec<RawObservation>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut out = Vec::new();
    let mut header: Option<(usize, usize)> = None;
    let mut error_column: Option<usize> = None;

    for record in reader.records() {
        let record =
            record.map_err(|e| Error::Source(format!("malformed query response: {}", e)))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            header = None;
            continue;
        }
        if let Some(idx) = error_column {
            let message = record.get(idx).filter(|m| !m.is_empty()).unwrap_or("query failed");
            return Err(Error::Source(message.to_string()));
        }
        if let Some(columns) = header_columns(&record) {
            header = Some(columns);
            continue;
        }

        let Some((time_idx, value_idx)) = header else {
            if let Some(idx) = record.iter().position(|c| c == "error") {
                error_column = Some(idx);
                continue;
            }
            return Err(Error::Source(format!(
                "query result has no _time/_value columns: {}",
                join_record(&record)
            )));
        };

        let (Some(time), Some(value)) = (record.get(time_idx), record.get(value_idx)) else {
            return Err(Error::Source(format!(
                "truncated result row: {}",
                join_record(&record)
            )));
        };
        if value.is_empty() {
            continue;
        }
        let timestamp = DateTime::parse_from_rfc3339(time)
            .map_err(|e| Error::Source(format!("invalid _time '{}': {}", time, e)))?
            .with_timezone(&Utc);
        let value: f64 = value
            .parse()
            .map_err(|_| Error::Source(format!("non-numeric _value '{}'", value)))?;
        out.push(RawObservation::new(timestamp, value));
    }

    if error_column.is_some() {
        return Err(Error::Source("query failed".into()));
    }
    Ok(out)
}

/// `(_time, _value)` positions when the record is a table header.
fn header_columns(record: &csv::StringRecord) -> Option<(usize, usize)> {
    let time = record.iter().position(|c| c == "_time")?;
    let value = record.iter().position(|c| c == "_value")?;
    Some((time, value))
}

fn join_record(record: &csv::StringRecord) -> String {
    record.iter().collect::<Vec<_>>().join(",")
}
