//! The forecast pipeline: fetch, normalize, fit, predict, format, write.
//!
//! A [`Pipeline`] borrows its source, model and sink for the length of one
//! [`Pipeline::run`] and holds no state between runs. Stages run strictly in
//! sequence. Any failure ends the run and is returned wrapped in
//! [`Error::Stage`](crate::error::Error::Stage) with the entity and the stage it came from.

use crate::config::Settings;
use crate::error::{Result, Stage};
use crate::forecast::{ForecastConfig, Forecaster, Horizon};
use crate::format::ForecastFormatter;
use crate::normalize::SeriesNormalizer;
use crate::sink::{write_lines, TimeSeriesSink, WriteOptions, WriteTarget};
use crate::source::{SeriesQuery, TimeSeriesSource};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Number of formatted lines kept for the end-of-run preview.
pub const PREVIEW_LINES: usize = 10;

/// What one run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub entity: String,
    /// Raw observations returned by the source
    pub observations: usize,
    /// Points in the normalized series
    pub series_points: usize,
    /// Prediction rows, history included
    pub rows: usize,
    /// Rows whose interval does not contain the point estimate
    pub unordered_rows: usize,
    pub lines_written: usize,
    pub batches: usize,
    pub retries: usize,
    /// First formatted lines, in write order
    pub preview: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

pub struct Pipeline<'a> {
    source: &'a dyn TimeSeriesSource,
    forecaster: &'a dyn Forecaster,
    sink: &'a dyn TimeSeriesSink,
    entity: String,
    query: SeriesQuery,
    normalizer: SeriesNormalizer,
    model_config: ForecastConfig,
    horizon: Horizon,
    include_history: bool,
    formatter: ForecastFormatter,
    target: WriteTarget,
    write_options: WriteOptions,
}

impl<'a> Pipeline<'a> {
    /// Builds a pipeline from validated settings.
    pub fn new(
        settings: &Settings,
        source: &'a dyn TimeSeriesSource,
        forecaster: &'a dyn Forecaster,
        sink: &'a dyn TimeSeriesSink,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            source,
            forecaster,
            sink,
            entity: settings.source.entity.clone(),
            query: settings.source.query(&settings.store.bucket),
            normalizer: SeriesNormalizer::new(settings.normalize.clone()),
            model_config: settings.forecast.clone(),
            horizon: settings.horizon.horizon()?,
            include_history: settings.horizon.include_history,
            formatter: ForecastFormatter::new(settings.sink.measurement.clone()),
            target: settings.write_target(),
            write_options: settings.sink.write_options(),
        })
    }

    /// Replaces the sink batching options.
    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = options;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn query(&self) -> &SeriesQuery {
        &self.query
    }

    /// Runs every stage once.
    pub async fn run(&self) -> Result<RunSummary> {
        let span = info_span!("pipeline", entity = %self.entity, model = self.forecaster.name());
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let entity = self.entity.as_str();
        let mut summary = RunSummary {
            entity: entity.to_string(),
            ..RunSummary::default()
        };

        let raw = self
            .source
            .fetch(&self.query)
            .await
            .map_err(|e| e.in_stage(entity, Stage::Fetch))?;
        summary.observations = raw.len();
        info!(observations = raw.len(), "fetched telemetry");

        let series = self
            .normalizer
            .normalize(raw)
            .map_err(|e| e.in_stage(entity, Stage::Normalize))?;
        summary.series_points = series.len();
        if let (Some(first), Some(last)) = (series.first(), series.last()) {
            debug!(
                points = series.len(),
                first = %first.timestamp,
                last = %last.timestamp,
                "series ready"
            );
        }

        let fit_started = Instant::now();
        let model = self
            .forecaster
            .fit(&series, &self.model_config)
            .map_err(|e| e.in_stage(entity, Stage::Fit))?;
        info!(
            points = model.history_len(),
            elapsed_ms = fit_started.elapsed().as_millis() as u64,
            "model fitted"
        );

        let rows = self
            .forecaster
            .predict(model.as_ref(), &self.horizon, self.include_history)
            .map_err(|e| e.in_stage(entity, Stage::Predict))?;
        summary.rows = rows.len();

        let batch = self.formatter.batch(rows);
        summary.unordered_rows = batch.unordered_rows();
        if summary.unordered_rows > 0 {
            warn!(
                rows = summary.unordered_rows,
                "prediction rows with inconsistent bounds"
            );
        }
        let lines = self
            .formatter
            .format(&batch)
            .map_err(|e| e.in_stage(entity, Stage::Format))?;
        summary.preview = lines.iter().take(PREVIEW_LINES).cloned().collect();

        let report = write_lines(self.sink, self.target.clone(), lines, self.write_options)
            .await
            .map_err(|e| e.in_stage(entity, Stage::Write))?;
        summary.lines_written = report.lines;
        summary.batches = report.batches;
        summary.retries = report.retries;
        summary.elapsed = started.elapsed();

        info!(
            lines = report.lines,
            batches = report.batches,
            retries = report.retries,
            measurement = self.formatter.measurement(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "forecast written"
        );
        Ok(summary)
    }
}
