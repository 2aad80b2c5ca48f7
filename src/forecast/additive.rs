//! Additive seasonal-trend model.
//!
//! `y(t) = trend(t) + Σ seasonality(t) + ε`, fitted on a time axis scaled to
//! `[0, 1]` over the history and values scaled by `max |y|`:
//!
//! - trend: piecewise linear, `m + k·t + Σ δⱼ·max(t − sⱼ, 0)` with candidate
//!   changepoints `sⱼ` spread over the first `changepoint_range` of history;
//! - seasonality: Fourier series with periods of 1, 7 and 365.25 days;
//! - priors: Gaussian on every coefficient (`δⱼ` scaled by
//!   `changepoint_prior_scale`, seasonal terms by `seasonality_prior_scale`),
//!   which turns the MAP estimate into a ridge problem. The noise variance and
//!   the coefficients are solved alternately until the variance settles.
//!
//! Uncertainty intervals come from Monte Carlo simulation of future trend
//! changes: changepoints arrive at the historical rate, their rate changes
//! are Laplace-distributed with the mean fitted magnitude, and Gaussian
//! observation noise is added on top.

use super::{FittedModel, ForecastConfig, Forecaster, Horizon, PredictionRow};
use crate::error::{Error, Result};
use crate::series::Series;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp1, Poisson, StandardNormal};
use std::f64::consts::PI;
use tracing::debug;

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Prior scale on the base offset and growth rate.
const TREND_PRIOR_SCALE: f64 = 5.0;
/// Starting noise scale for the alternating solve.
const INITIAL_SIGMA: f64 = 0.5;
const MIN_NOISE_VARIANCE: f64 = 1e-8;
const MAX_FIT_ITERATIONS: usize = 100;
const FIT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Seasonality {
    period_days: f64,
    order: usize,
}

const DAILY: Seasonality = Seasonality {
    period_days: 1.0,
    order: 4,
};
const WEEKLY: Seasonality = Seasonality {
    period_days: 7.0,
    order: 3,
};
const YEARLY: Seasonality = Seasonality {
    period_days: 365.25,
    order: 10,
};

/// The built-in [`Forecaster`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveForecaster;

impl AdditiveForecaster {
    pub fn new() -> Self {
        Self
    }
}

impl Forecaster for AdditiveForecaster {
    fn name(&self) -> &str {
        "additive"
    }

    fn fit(&self, series: &Series, config: &ForecastConfig) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(AdditiveModel::fit(series, config)?))
    }
}

/// A fitted [`AdditiveForecaster`] model.
#[derive(Debug, Clone)]
pub struct AdditiveModel {
    history: Vec<DateTime<Utc>>,
    start: i64,
    span: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    seasonalities: Vec<Seasonality>,
    /// `[m, k, δ..., fourier...]`
    beta: Vec<f64>,
    sigma: f64,
    interval_width: f64,
    uncertainty_samples: usize,
    seed: Option<u64>,
}

impl AdditiveModel {
    pub fn fit(series: &Series, config: &ForecastConfig) -> Result<Self> {
        let required = config.min_points.max(2);
        if series.len() < required {
            return Err(Error::InsufficientData {
                required,
                actual: series.len(),
            });
        }
        config.validate()?;

        let values = series.values();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::ModelFit("series contains non-finite values".into()));
        }

        let history = series.timestamps();
        let start = history[0].timestamp();
        let span = (history[history.len() - 1].timestamp() - start) as f64;
        if span <= 0.0 {
            return Err(Error::ModelFit("history spans no time".into()));
        }

        let y_scale = match values.iter().fold(0.0f64, |acc, v| acc.max(v.abs())) {
            m if m > 0.0 => m,
            _ => 1.0,
        };
        let y: Vec<f64> = values.iter().map(|v| v / y_scale).collect();
        let t: Vec<f64> = history
            .iter()
            .map(|ts| (ts.timestamp() - start) as f64 / span)
            .collect();

        let changepoints = place_changepoints(&t, config.n_changepoints, config.changepoint_range);
        let seasonalities = enabled_seasonalities(config);

        let mut prior_scales = vec![TREND_PRIOR_SCALE, TREND_PRIOR_SCALE];
        prior_scales.extend(std::iter::repeat(config.changepoint_prior_scale).take(changepoints.len()));
        for s in &seasonalities {
            prior_scales.extend(std::iter::repeat(config.seasonality_prior_scale).take(2 * s.order));
        }
        let p = prior_scales.len();

        let mut design = Vec::with_capacity(y.len() * p);
        let mut row = Vec::with_capacity(p);
        for (ts, &ti) in history.iter().zip(&t) {
            features(ts.timestamp(), ti, &changepoints, &seasonalities, &mut row);
            design.extend_from_slice(&row);
        }

        let (gram, xty) = normal_equations(&design, &y, p);

        let mut sigma2 = INITIAL_SIGMA * INITIAL_SIGMA;
        let mut beta = Vec::new();
        let mut iterations = 0;
        let mut converged = false;
        while iterations < MAX_FIT_ITERATIONS {
            iterations += 1;
            let mut a = gram.clone();
            for (j, scale) in prior_scales.iter().enumerate() {
                a[j * p + j] += sigma2 / (scale * scale);
            }
            let mut b = xty.clone();
            solve_spd(&mut a, &mut b, p).ok_or_else(|| {
                Error::ModelFit("normal equations are not positive definite".into())
            })?;
            beta = b;

            let rss: f64 = design
                .chunks_exact(p)
                .zip(&y)
                .map(|(x, yi)| (yi - dot(x, &beta)).powi(2))
                .sum();
            let next = (rss / y.len() as f64).max(MIN_NOISE_VARIANCE);
            if !next.is_finite() {
                return Err(Error::ModelFit("residual variance is not finite".into()));
            }
            let change = (next - sigma2).abs() / sigma2;
            sigma2 = next;
            if change < FIT_TOLERANCE {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(Error::ModelFit(format!(
                "noise variance did not converge after {} iterations",
                MAX_FIT_ITERATIONS
            )));
        }

        debug!(
            points = history.len(),
            changepoints = changepoints.len(),
            parameters = p,
            iterations,
            sigma = sigma2.sqrt() * y_scale,
            "fitted additive model"
        );

        Ok(Self {
            history,
            start,
            span,
            y_scale,
            changepoints,
            seasonalities,
            beta,
            sigma: sigma2.sqrt(),
            interval_width: config.interval_width,
            uncertainty_samples: config.uncertainty_samples,
            seed: config.seed,
        })
    }

    fn scaled_time(&self, ts: &DateTime<Utc>) -> f64 {
        (ts.timestamp() - self.start) as f64 / self.span
    }

    /// Per-timestamp `(lower, upper)` on the scaled axis. `t` must be
    /// non-decreasing.
    fn simulate_intervals(&self, t: &[f64], yhat: &[f64]) -> Vec<(f64, f64)> {
        if self.uncertainty_samples == 0 {
            return yhat.iter().map(|&y| (y, y)).collect();
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let n_changepoints = self.changepoints.len();
        let deltas = &self.beta[2..2 + n_changepoints];
        let laplace_scale =
            deltas.iter().map(|d| d.abs()).sum::<f64>() / n_changepoints.max(1) as f64 + 1e-8;
        let t_max = t.iter().copied().fold(1.0f64, f64::max);

        let mut paths: Vec<TrendPath> = (0..self.uncertainty_samples)
            .map(|_| TrendPath::sample(&mut rng, n_changepoints, t_max, laplace_scale))
            .collect();

        let lower_q = (1.0 - self.interval_width) / 2.0;
        let upper_q = (1.0 + self.interval_width) / 2.0;
        let mut draws = vec![0.0; self.uncertainty_samples];
        let mut out = Vec::with_capacity(t.len());

        for (&ti, &point) in t.iter().zip(yhat) {
            for (draw, path) in draws.iter_mut().zip(paths.iter_mut()) {
                *draw = point + path.deviation_at(ti) + self.sigma * standard_normal(&mut rng);
            }
            draws.sort_unstable_by(f64::total_cmp);
            out.push((quantile(&draws, lower_q), quantile(&draws, upper_q)));
        }
        out
    }
}

impl FittedModel for AdditiveModel {
    fn history_len(&self) -> usize {
        self.history.len()
    }

    fn predict(&self, horizon: &Horizon, include_history: bool) -> Result<Vec<PredictionRow>> {
        let last = self
            .history
            .last()
            .copied()
            .ok_or_else(|| Error::ModelFit("model has no history".into()))?;

        let mut timestamps = if include_history {
            self.history.clone()
        } else {
            Vec::with_capacity(horizon.periods)
        };
        timestamps.extend(horizon.future_timestamps(last)?);

        let t: Vec<f64> = timestamps.iter().map(|ts| self.scaled_time(ts)).collect();
        let mut row = Vec::with_capacity(self.beta.len());
        let yhat: Vec<f64> = timestamps
            .iter()
            .zip(&t)
            .map(|(ts, &ti)| {
                features(ts.timestamp(), ti, &self.changepoints, &self.seasonalities, &mut row);
                dot(&row, &self.beta)
            })
            .collect();

        let intervals = self.simulate_intervals(&t, &yhat);

        Ok(timestamps
            .into_iter()
            .zip(yhat)
            .zip(intervals)
            .map(|((timestamp, point), (lower, upper))| PredictionRow {
                timestamp,
                point_estimate: point * self.y_scale,
                lower_bound: lower.min(point) * self.y_scale,
                upper_bound: upper.max(point) * self.y_scale,
            })
            .collect())
    }
}

/// One simulated future trend: rate changes `(at, delta)` sorted by `at`.
struct TrendPath {
    changes: Vec<(f64, f64)>,
    cursor: usize,
    slope: f64,
    offset: f64,
}

impl TrendPath {
    fn sample(rng: &mut StdRng, n_changepoints: usize, t_max: f64, scale: f64) -> Self {
        let mut changes = Vec::new();
        if n_changepoints > 0 && t_max > 1.0 {
            let count = poisson(rng, n_changepoints as f64 * (t_max - 1.0));
            changes = (0..count)
                .map(|_| (rng.gen_range(1.0..t_max), laplace(rng, scale)))
                .collect();
            changes.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
        }
        Self {
            changes,
            cursor: 0,
            slope: 0.0,
            offset: 0.0,
        }
    }

    /// Trend deviation at `t`; successive calls must not go back in time.
    fn deviation_at(&mut self, t: f64) -> f64 {
        while let Some(&(at, delta)) = self.changes.get(self.cursor) {
            if at >= t {
                break;
            }
            self.slope += delta;
            self.offset += delta * at;
            self.cursor += 1;
        }
        self.slope * t - self.offset
    }
}

fn enabled_seasonalities(config: &ForecastConfig) -> Vec<Seasonality> {
    [
        (config.daily_seasonality, DAILY),
        (config.weekly_seasonality, WEEKLY),
        (config.yearly_seasonality, YEARLY),
    ]
    .into_iter()
    .filter_map(|(enabled, s)| enabled.then_some(s))
    .collect()
}

/// Candidate changepoints: evenly spaced history points inside the first
/// `range` share of the history, excluding the first point.
fn place_changepoints(t: &[f64], requested: usize, range: f64) -> Vec<f64> {
    let hist = (t.len() as f64 * range).floor() as usize;
    if requested == 0 || hist < 2 {
        return Vec::new();
    }
    let count = requested.min(hist - 1);
    let step = (hist - 1) as f64 / count as f64;
    (1..=count)
        .map(|i| t[(i as f64 * step).round() as usize])
        .collect()
}

fn features(
    ts_secs: i64,
    t: f64,
    changepoints: &[f64],
    seasonalities: &[Seasonality],
    row: &mut Vec<f64>,
) {
    row.clear();
    row.push(1.0);
    row.push(t);
    row.extend(changepoints.iter().map(|c| (t - c).max(0.0)));
    let days = ts_secs as f64 / SECONDS_PER_DAY;
    for s in seasonalities {
        for k in 1..=s.order {
            let x = 2.0 * PI * k as f64 * days / s.period_days;
            row.push(x.sin());
            row.push(x.cos());
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `(XᵀX, Xᵀy)` for a row-major design matrix with `p` columns.
fn normal_equations(design: &[f64], y: &[f64], p: usize) -> (Vec<f64>, Vec<f64>) {
    let mut gram = vec![0.0; p * p];
    let mut xty = vec![0.0; p];
    for (x, &yi) in design.chunks_exact(p).zip(y) {
        for i in 0..p {
            xty[i] += x[i] * yi;
            for j in 0..=i {
                gram[i * p + j] += x[i] * x[j];
            }
        }
    }
    for i in 0..p {
        for j in 0..i {
            gram[j * p + i] = gram[i * p + j];
        }
    }
    (gram, xty)
}

/// Solves `A x = b` in place for symmetric positive-definite `A` (Cholesky).
/// Returns `None` when `A` is not positive definite or the solution is not finite.
fn solve_spd(a: &mut [f64], b: &mut [f64], n: usize) -> Option<()> {
    for j in 0..n {
        let mut d = a[j * n + j];
        for k in 0..j {
            d -= a[j * n + k] * a[j * n + k];
        }
        if !(d > 0.0 && d.is_finite()) {
            return None;
        }
        let d = d.sqrt();
        a[j * n + j] = d;
        for i in (j + 1)..n {
            let mut s = a[i * n + j];
            for k in 0..j {
                s -= a[i * n + k] * a[j * n + k];
            }
            a[i * n + j] = s / d;
        }
    }
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= a[i * n + k] * b[k];
        }
        b[i] = s / a[i * n + i];
    }
    for i in (0..n).rev() {
        let mut s = b[i];
        for k in (i + 1)..n {
            s -= a[k * n + i] * b[k];
        }
        b[i] = s / a[i * n + i];
    }
    b.iter().all(|v| v.is_finite()).then_some(())
}

/// Linear-interpolated quantile of sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    rng.sample(StandardNormal)
}

/// Laplace(0, scale): an exponential magnitude with a random sign.
fn laplace(rng: &mut StdRng, scale: f64) -> f64 {
    let magnitude: f64 = rng.sample(Exp1);
    if rng.gen::<bool>() {
        scale * magnitude
    } else {
        -scale * magnitude
    }
}

fn poisson(rng: &mut StdRng, lambda: f64) -> usize {
    match Poisson::new(lambda) {
        Ok(dist) => dist.sample(rng) as usize,
        // Non-positive or non-finite rate: no changes.
        Err(_) => 0,
    }
}
