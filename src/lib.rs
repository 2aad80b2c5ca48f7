//! capcast: forecast storage usage from InfluxDB telemetry.
//!
//! A run pulls an aggregated usage series for one entity from the store,
//! normalizes it, fits a seasonal-trend model, predicts a horizon with
//! uncertainty bounds and writes the predictions back as line protocol to a
//! separate measurement.

pub mod cli;
pub mod config;
pub mod error;
pub mod forecast;
pub mod format;
pub mod influx;
pub mod normalize;
pub mod pipeline;
pub mod series;
pub mod sink;
pub mod source;
pub mod span;

pub use config::{ConfigArgs, Settings};
pub use error::{Error, Result, Stage};
pub use forecast::{AdditiveForecaster, ForecastConfig, Forecaster, FittedModel, Horizon, PredictionRow};
pub use format::{ForecastBatch, ForecastFormatter};
pub use influx::InfluxClient;
pub use normalize::{NormalizeConfig, SeriesNormalizer};
pub use pipeline::{Pipeline, RunSummary};
pub use series::{DuplicatePolicy, Granularity, Observation, RawObservation, Series};
pub use sink::{BatchWriter, StdoutSink, TimeSeriesSink, WriteError, WriteOptions, WriteTarget};
pub use source::{SeriesQuery, SourceConfig, TimeSeriesSource};
pub use span::Span;
