use crate::cli::commands::{ConfigCommand, RunCommand};
use crate::config::Settings;
use crate::error::Result;
use crate::forecast::{AdditiveForecaster, Forecaster};
use crate::influx::InfluxClient;
use crate::pipeline::{Pipeline, RunSummary};
use crate::sink::{StdoutSink, TimeSeriesSink, WriteOptions};
use crate::source::TimeSeriesSource;
use std::time::Duration;
use tracing::{debug, info};

/// Runs the pipeline once. The store client lives only for this call.
pub async fn handle_run(command: RunCommand) -> Result<RunSummary> {
    let mut settings = Settings::load(&command.config)?;
    if command.no_history {
        settings.horizon.include_history = false;
    }
    if command.seed.is_some() {
        settings.forecast.seed = command.seed;
    }
    settings.validate()?;

    info!(
        url = %settings.store.url,
        bucket = %settings.store.bucket,
        entity = %settings.source.entity,
        periods = settings.horizon.periods,
        frequency = %settings.horizon.frequency,
        dry_run = command.dry_run,
        "starting forecast run"
    );

    let forecaster = AdditiveForecaster::new();
    let client = InfluxClient::new(&settings.store, settings.token())?;
    debug!(flux = %settings.source.query(&settings.store.bucket).to_flux(), "source query");

    let summary = execute(&settings, &client, &forecaster, &client, command.dry_run).await?;

    for line in &summary.preview {
        info!(target: "capcast::preview", "{}", line);
    }
    Ok(summary)
}

/// Runs one pipeline. A dry run formats to stdout instead of `store`.
async fn execute(
    settings: &Settings,
    source: &dyn TimeSeriesSource,
    forecaster: &dyn Forecaster,
    store: &dyn TimeSeriesSink,
    dry_run: bool,
) -> Result<RunSummary> {
    let stdout = StdoutSink;
    let (sink, options): (&dyn TimeSeriesSink, WriteOptions) = if dry_run {
        let options = WriteOptions {
            jitter_interval: Duration::ZERO,
            ..settings.sink.write_options()
        };
        (&stdout, options)
    } else {
        (store, settings.sink.write_options())
    };
    let pipeline = Pipeline::new(settings, source, forecaster, sink)?.with_write_options(options);
    let summary = pipeline.run().await?;
    Ok(summary)
}

/// Prints the effective configuration as JSON. The token is never printed.
pub fn handle_config(command: ConfigCommand) -> Result<()> {
    let settings = Settings::load(&command.config)?;
    if command.check {
        settings.validate()?;
    }
    println!("{}", render_settings(&settings)?);
    Ok(())
}

pub fn render_settings(settings: &Settings) -> Result<String> {
    Ok(serde_json::to_string_pretty(settings)?)
}
