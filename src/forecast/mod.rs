//! Forecasting capability.
//!
//! The pipeline only talks to a model through [`Forecaster`] and
//! [`FittedModel`]: fit on an ordered [`Series`], then predict point estimates
//! and uncertainty bounds over a [`Horizon`]. [`AdditiveForecaster`] is the
//! built-in implementation; any seasonal-trend model honouring the same
//! contract can be plugged in instead.

pub mod additive;

pub use additive::{AdditiveForecaster, AdditiveModel};

use crate::error::{Error, Result};
use crate::series::Series;
use crate::span::Span;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Model settings shared by every forecaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_true")]
    pub weekly_seasonality: bool,
    #[serde(default = "default_true")]
    pub yearly_seasonality: bool,
    #[serde(default)]
    pub daily_seasonality: bool,
    /// Trend flexibility; lower values give a stiffer trend
    #[serde(default = "default_changepoint_prior_scale")]
    pub changepoint_prior_scale: f64,
    /// Number of candidate trend changepoints
    #[serde(default = "default_n_changepoints")]
    pub n_changepoints: usize,
    /// Share of the history in which changepoints may be placed
    #[serde(default = "default_changepoint_range")]
    pub changepoint_range: f64,
    #[serde(default = "default_seasonality_prior_scale")]
    pub seasonality_prior_scale: f64,
    /// Coverage of the uncertainty interval, e.g. 0.8 for 80%
    #[serde(default = "default_interval_width")]
    pub interval_width: f64,
    /// Monte Carlo draws used to estimate the interval; 0 disables it
    #[serde(default = "default_uncertainty_samples")]
    pub uncertainty_samples: usize,
    /// Fitting is refused below this many points
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    /// Fixed RNG seed for reproducible intervals
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            weekly_seasonality: true,
            yearly_seasonality: true,
            daily_seasonality: false,
            changepoint_prior_scale: default_changepoint_prior_scale(),
            n_changepoints: default_n_changepoints(),
            changepoint_range: default_changepoint_range(),
            seasonality_prior_scale: default_seasonality_prior_scale(),
            interval_width: default_interval_width(),
            uncertainty_samples: default_uncertainty_samples(),
            min_points: default_min_points(),
            seed: None,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.changepoint_prior_scale > 0.0 && self.changepoint_prior_scale.is_finite()) {
            return Err(Error::InvalidArgument(
                "changepoint_prior_scale must be a positive number".into(),
            ));
        }
        if !(self.seasonality_prior_scale > 0.0 && self.seasonality_prior_scale.is_finite()) {
            return Err(Error::InvalidArgument(
                "seasonality_prior_scale must be a positive number".into(),
            ));
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(Error::InvalidArgument(
                "interval_width must be within (0, 1)".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.changepoint_range) {
            return Err(Error::InvalidArgument(
                "changepoint_range must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_changepoint_prior_scale() -> f64 {
    0.0001
}

fn default_n_changepoints() -> usize {
    25
}

fn default_changepoint_range() -> f64 {
    0.8
}

fn default_seasonality_prior_scale() -> f64 {
    10.0
}

fn default_interval_width() -> f64 {
    0.8
}

fn default_uncertainty_samples() -> usize {
    1000
}

fn default_min_points() -> usize {
    2
}

/// Future range to predict: `periods` steps of `frequency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub periods: usize,
    pub frequency: TimeDelta,
}

impl Horizon {
    pub fn new(periods: usize, frequency: TimeDelta) -> Result<Self> {
        if frequency <= TimeDelta::zero() {
            return Err(Error::InvalidArgument(
                "forecast frequency must be positive".into(),
            ));
        }
        Ok(Self { periods, frequency })
    }

    pub fn from_span(periods: usize, frequency: Span) -> Result<Self> {
        Self::new(periods, frequency.as_delta())
    }

    /// Future timestamps following `last`, one step apart.
    pub fn future_timestamps(&self, last: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let mut out = Vec::with_capacity(self.periods);
        let mut ts = last;
        for _ in 0..self.periods {
            ts = ts.checked_add_signed(self.frequency).ok_or_else(|| {
                Error::InvalidArgument("forecast horizon exceeds the representable time range".into())
            })?;
            out.push(ts);
        }
        Ok(out)
    }
}

/// One predicted point with its uncertainty interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub timestamp: DateTime<Utc>,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl PredictionRow {
    /// `lower_bound <= point_estimate <= upper_bound`.
    pub fn is_ordered(&self) -> bool {
        self.lower_bound <= self.point_estimate && self.point_estimate <= self.upper_bound
    }

    /// The first non-finite field, by wire name.
    pub fn non_finite_field(&self) -> Option<(&'static str, f64)> {
        [
            ("yhat", self.point_estimate),
            ("yhat_lower", self.lower_bound),
            ("yhat_upper", self.upper_bound),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
    }
}

/// A model fitted to one series, ready to predict.
pub trait FittedModel: Send + Sync {
    /// Number of observations the model was fitted on.
    fn history_len(&self) -> usize;

    /// Predicts over `horizon`; with `include_history` the in-sample fit for
    /// every history timestamp comes first.
    fn predict(&self, horizon: &Horizon, include_history: bool) -> Result<Vec<PredictionRow>>;
}

/// A pluggable seasonal-trend forecasting model.
pub trait Forecaster: Send + Sync {
    /// Short model name for logs.
    fn name(&self) -> &str;

    /// Fits the model. Fails with [`Error::InsufficientData`] before any
    /// optimization when the series is shorter than `config.min_points`, and
    /// with [`Error::ModelFit`] when the fit does not converge.
    fn fit(&self, series: &Series, config: &ForecastConfig) -> Result<Box<dyn FittedModel>>;

    fn predict(
        &self,
        model: &dyn FittedModel,
        horizon: &Horizon,
        include_history: bool,
    ) -> Result<Vec<PredictionRow>> {
        model.predict(horizon, include_history)
    }
}
