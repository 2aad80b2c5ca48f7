//! Configuration management for capcast.
//!
//! Settings are layered from, in increasing precedence:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/capcast/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (`CAPCAST_<SECTION>__<KEY>`, e.g. `CAPCAST_STORE__URL`)
//! 5. Command-line arguments
//!
//! # Environment Variables
//!
//! The store token should be provided via the environment rather than a file:
//! - `CAPCAST_TOKEN` - InfluxDB API token (`username:password` for 1.8 servers)

use crate::error::{Error, Result};
use crate::forecast::{ForecastConfig, Horizon};
use crate::normalize::NormalizeConfig;
use crate::series::Granularity;
use crate::sink::{SinkConfig, WriteTarget};
use crate::source::SourceConfig;
use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Environment variable holding the store token.
pub const TOKEN_ENV: &str = "CAPCAST_TOKEN";

/// Command-line overrides shared by every command that loads settings.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// InfluxDB base URL
    #[arg(long)]
    pub url: Option<String>,

    /// InfluxDB organization
    #[arg(long)]
    pub org: Option<String>,

    /// Bucket read from and written to
    #[arg(long)]
    pub bucket: Option<String>,

    /// Entity (tag value) whose series is forecast
    #[arg(long)]
    pub entity: Option<String>,

    /// Destination measurement for forecast points
    #[arg(long)]
    pub measurement: Option<String>,

    /// Number of future steps to predict
    #[arg(long)]
    pub periods: Option<usize>,

    /// Step between predicted points, e.g. 1h or 1d
    #[arg(long)]
    pub frequency: Option<Span>,

    /// Timestamp granularity of the normalized series
    #[arg(long)]
    pub granularity: Option<Granularity>,
}

/// Where the telemetry store lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_org")]
    pub org: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Prefer `CAPCAST_TOKEN`; a token in a config file is used only as a fallback
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            org: default_org(),
            bucket: default_bucket(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_org() -> String {
    "-".to_string()
}

fn default_bucket() -> String {
    "telegraf/autogen".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// How far ahead to forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonConfig {
    #[serde(default = "default_periods")]
    pub periods: usize,
    #[serde(default = "default_frequency")]
    pub frequency: Span,
    /// Also emit fitted values for the history
    #[serde(default = "default_include_history")]
    pub include_history: bool,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            periods: default_periods(),
            frequency: default_frequency(),
            include_history: default_include_history(),
        }
    }
}

impl HorizonConfig {
    pub fn horizon(&self) -> Result<Horizon> {
        Horizon::from_span(self.periods, self.frequency)
    }
}

fn default_periods() -> usize {
    8760
}

fn default_frequency() -> Span {
    Span::hours(1)
}

fn default_include_history() -> bool {
    true
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub horizon: HorizonConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

impl Settings {
    /// Loads settings from every layer and applies `args` on top.
    pub fn load(args: &ConfigArgs) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/capcast/config.toml").required(false));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CAPCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.apply(args);
        Ok(settings)
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, args: &ConfigArgs) {
        if let Some(url) = &args.url {
            self.store.url = url.clone();
        }
        if let Some(org) = &args.org {
            self.store.org = org.clone();
        }
        if let Some(bucket) = &args.bucket {
            self.store.bucket = bucket.clone();
        }
        if let Some(entity) = &args.entity {
            self.source.entity = entity.clone();
        }
        if let Some(measurement) = &args.measurement {
            self.sink.measurement = measurement.clone();
        }
        if let Some(periods) = args.periods {
            self.horizon.periods = periods;
        }
        if let Some(frequency) = args.frequency {
            self.horizon.frequency = frequency;
        }
        if let Some(granularity) = args.granularity {
            self.normalize.granularity = granularity;
        }
    }

    /// Rejects settings that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        if self.store.url.trim().is_empty() {
            return Err(Error::Config("store.url is empty".into()));
        }
        if self.store.bucket.is_empty() {
            return Err(Error::Config("store.bucket is empty".into()));
        }
        if self.source.entity.is_empty() {
            return Err(Error::Config(
                "source.entity is not set (use --entity or CAPCAST_SOURCE__ENTITY)".into(),
            ));
        }
        if self.source.measurement.is_empty() || self.sink.measurement.is_empty() {
            return Err(Error::Config("measurement names must not be empty".into()));
        }
        if self.source.measurement == self.sink.measurement {
            return Err(Error::Config(format!(
                "sink.measurement must differ from the source measurement '{}'",
                self.source.measurement
            )));
        }
        if self.horizon.periods == 0 {
            return Err(Error::Config("horizon.periods must be at least 1".into()));
        }
        if self.sink.batch_size == 0 {
            return Err(Error::Config("sink.batch_size must be at least 1".into()));
        }
        self.horizon.horizon()?;
        self.forecast
            .validate()
            .map_err(|e| Error::Config(format!("forecast: {}", e)))
    }

    /// Store token, preferring `CAPCAST_TOKEN` over the configured value.
    pub fn token(&self) -> Option<String> {
        env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.store.token.clone())
    }

    pub fn write_target(&self) -> WriteTarget {
        WriteTarget {
            bucket: self.store.bucket.clone(),
            org: self.store.org.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::DuplicatePolicy;
    use std::io::Write;
    use tempfile::Builder;

    fn valid() -> Settings {
        let mut settings = Settings::default();
        settings.source.entity = "688287b9".into();
        settings
    }

    #[test]
    fn test_embedded_defaults() {
        let settings = Settings::load(&ConfigArgs::default()).unwrap();
        assert_eq!(settings.store.org, "-");
        assert_eq!(settings.store.bucket, "telegraf/autogen");
        assert_eq!(settings.source.measurement, "ceph_cluster_stats");
        assert_eq!(settings.sink.measurement, "ceph_cluster_stats_fc");
        assert_eq!(settings.horizon.periods, 8760);
        assert_eq!(settings.horizon.frequency, Span::hours(1));
        assert_eq!(settings.forecast.changepoint_prior_scale, 0.0001);
        assert_eq!(settings.normalize.duplicates, DuplicatePolicy::Mean);
    }

    #[test]
    fn test_code_defaults_match_embedded_file() {
        let loaded = Settings::load(&ConfigArgs::default()).unwrap();
        assert_eq!(loaded.forecast, ForecastConfig::default());
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn test_user_file_and_cli_overrides() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[store]\nurl = \"http://odo.fan:8086\"\n\n[horizon]\nperiods = 48\nfrequency = \"1d\"\n\n[sink]\nbatch_size = 250"
        )
        .unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            periods: Some(24),
            entity: Some("fsid-1".into()),
            ..ConfigArgs::default()
        };
        let settings = Settings::load(&args).unwrap();
        assert_eq!(settings.store.url, "http://odo.fan:8086");
        assert_eq!(settings.horizon.periods, 24);
        assert_eq!(settings.horizon.frequency, Span::days(1));
        assert_eq!(settings.sink.batch_size, 250);
        assert_eq!(settings.source.entity, "fsid-1");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_user_file_is_an_error() {
        let args = ConfigArgs {
            config: Some(PathBuf::from("/nonexistent/capcast.toml")),
            ..ConfigArgs::default()
        };
        assert!(matches!(Settings::load(&args), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut s = valid();
        s.source.entity.clear();
        assert!(s.validate().is_err());

        let mut s = valid();
        s.sink.measurement = s.source.measurement.clone();
        assert!(s.validate().is_err());

        let mut s = valid();
        s.horizon.periods = 0;
        assert!(s.validate().is_err());

        let mut s = valid();
        s.forecast.interval_width = 1.5;
        assert!(matches!(s.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_write_target() {
        let target = valid().write_target();
        assert_eq!(target.bucket, "telegraf/autogen");
        assert_eq!(target.org, "-");
    }
}
