//! Telemetry sink contract and batched delivery.
//!
//! [`BatchWriter`] buffers formatted lines and hands them to a
//! [`TimeSeriesSink`] one batch at a time. A batch goes out when it reaches
//! `batch_size` lines, when `flush_interval` has passed since the previous
//! flush, or on [`BatchWriter::close`]. Every batch waits a random jitter in
//! `[0, jitter_interval]` first. Transient failures are retried after
//! `retry_interval` (or the delay the store asks for) up to `max_retries`
//! times. Nothing tracks which batches landed before a fatal failure.

use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Destination of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub bucket: String,
    pub org: String,
}

/// Why a single batch write failed.
#[derive(Debug)]
pub enum WriteError {
    /// Worth retrying: throttling, server-side errors, timeouts
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// Connection failures and rejected requests
    Fatal(String),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Transient { reason, .. } => write!(f, "transient: {}", reason),
            WriteError::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

/// A store the pipeline can write line protocol to.
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Writes one batch; `body` holds newline-separated lines.
    async fn write_batch(
        &self,
        target: &WriteTarget,
        body: &str,
    ) -> std::result::Result<(), WriteError>;
}

/// Sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Destination measurement for forecast points
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_jitter_interval_ms")]
    pub jitter_interval_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            measurement: default_measurement(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            jitter_interval_ms: default_jitter_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl SinkConfig {
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            batch_size: self.batch_size.max(1),
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            jitter_interval: Duration::from_millis(self.jitter_interval_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_retries: self.max_retries,
        }
    }
}

fn default_measurement() -> String {
    "ceph_cluster_stats_fc".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_jitter_interval_ms() -> u64 {
    2_000
}

fn default_retry_interval_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub jitter_interval: Duration,
    pub retry_interval: Duration,
    pub max_retries: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        SinkConfig::default().write_options()
    }
}

/// Counters for one writer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub lines: usize,
    pub batches: usize,
    pub retries: usize,
}

pub struct BatchWriter<'a> {
    sink: &'a dyn TimeSeriesSink,
    target: WriteTarget,
    options: WriteOptions,
    buffer: Vec<String>,
    last_flush: Instant,
    rng: StdRng,
    report: WriteReport,
}

impl<'a> BatchWriter<'a> {
    pub fn new(sink: &'a dyn TimeSeriesSink, target: WriteTarget, options: WriteOptions) -> Self {
        Self {
            sink,
            target,
            buffer: Vec::with_capacity(options.batch_size),
            options,
            last_flush: Instant::now(),
            rng: StdRng::from_entropy(),
            report: WriteReport::default(),
        }
    }

    pub async fn push(&mut self, line: String) -> Result<()> {
        self.buffer.push(line);
        if self.buffer.len() >= self.options.batch_size
            || self.last_flush.elapsed() >= self.options.flush_interval
        {
            self.flush().await?;
        }
        Ok(())
    }

    /// Sends whatever is buffered as one batch.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let jitter_ms = self.options.jitter_interval.as_millis() as u64;
        if jitter_ms > 0 {
            let delay = Duration::from_millis(self.rng.gen_range(0..=jitter_ms));
            tokio::time::sleep(delay).await;
        }

        let body = self.buffer.join("\n");
        let mut attempt = 0u32;
        loop {
            match self.sink.write_batch(&self.target, &body).await {
                Ok(()) => break,
                Err(WriteError::Transient {
                    reason,
                    retry_after,
                }) if attempt < self.options.max_retries => {
                    attempt += 1;
                    self.report.retries += 1;
                    let delay = retry_after.unwrap_or(self.options.retry_interval);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "batch write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(WriteError::Transient { reason, .. }) => {
                    return Err(Error::Sink(format!(
                        "batch write failed after {} retries: {}",
                        attempt, reason
                    )));
                }
                Err(WriteError::Fatal(reason)) => return Err(Error::Sink(reason)),
            }
        }

        debug!(
            lines = self.buffer.len(),
            bucket = %self.target.bucket,
            "flushed batch"
        );
        self.report.lines += self.buffer.len();
        self.report.batches += 1;
        self.buffer.clear();
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Flushes the remainder and returns the counters.
    pub async fn close(mut self) -> Result<WriteReport> {
        self.flush().await?;
        Ok(self.report)
    }
}

/// Writes every line through a fresh [`BatchWriter`].
pub async fn write_lines(
    sink: &dyn TimeSeriesSink,
    target: WriteTarget,
    lines: Vec<String>,
    options: WriteOptions,
) -> Result<WriteReport> {
    let mut writer = BatchWriter::new(sink, target, options);
    for line in lines {
        writer.push(line).await?;
    }
    writer.close().await
}

/// Prints batches to stdout instead of writing them to a store.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl TimeSeriesSink for StdoutSink {
    async fn write_batch(
        &self,
        _target: &WriteTarget,
        body: &str,
    ) -> std::result::Result<(), WriteError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", body).map_err(|e| WriteError::Fatal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakySink {
        transient_failures: Mutex<usize>,
        fatal: bool,
        bodies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TimeSeriesSink for FlakySink {
        async fn write_batch(
            &self,
            _target: &WriteTarget,
            body: &str,
        ) -> std::result::Result<(), WriteError> {
            if self.fatal {
                return Err(WriteError::Fatal("connection refused".into()));
            }
            let mut failures = self.transient_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(WriteError::Transient {
                    reason: "503 Service Unavailable".into(),
                    retry_after: None,
                });
            }
            self.bodies.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    fn target() -> WriteTarget {
        WriteTarget {
            bucket: "telegraf/autogen".into(),
            org: "-".into(),
        }
    }

    fn options(batch_size: usize, max_retries: u32) -> WriteOptions {
        WriteOptions {
            batch_size,
            flush_interval: Duration::from_secs(3600),
            jitter_interval: Duration::ZERO,
            retry_interval: Duration::from_millis(1),
            max_retries,
        }
    }

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m,type=forecast yhat={}.0 0", i)).collect()
    }

    #[tokio::test]
    async fn test_lines_are_split_into_batches() {
        let sink = FlakySink::default();
        let report = write_lines(&sink, target(), lines(5), options(2, 0))
            .await
            .unwrap();
        assert_eq!(
            report,
            WriteReport {
                lines: 5,
                batches: 3,
                retries: 0
            }
        );
        let bodies = sink.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0], "m,type=forecast yhat=0.0 0\nm,type=forecast yhat=1.0 0");
        assert_eq!(bodies[2], "m,type=forecast yhat=4.0 0");
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sink = FlakySink {
            transient_failures: Mutex::new(2),
            ..FlakySink::default()
        };
        let report = write_lines(&sink, target(), lines(3), options(10, 3))
            .await
            .unwrap();
        assert_eq!(report.retries, 2);
        assert_eq!(report.batches, 1);
        assert_eq!(sink.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let sink = FlakySink {
            transient_failures: Mutex::new(5),
            ..FlakySink::default()
        };
        let err = write_lines(&sink, target(), lines(1), options(10, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sink(ref msg) if msg.contains("after 2 retries")));
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let sink = FlakySink {
            fatal: true,
            ..FlakySink::default()
        };
        let err = write_lines(&sink, target(), lines(1), options(10, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sink(ref msg) if msg == "connection refused"));
    }

    #[tokio::test]
    async fn test_elapsed_flush_interval_flushes_early() {
        let sink = FlakySink::default();
        let mut opts = options(100, 0);
        opts.flush_interval = Duration::ZERO;
        let report = write_lines(&sink, target(), lines(3), opts).await.unwrap();
        assert_eq!(report.batches, 3);
    }

    #[test]
    fn test_default_options_match_config_defaults() {
        let opts = WriteOptions::default();
        assert_eq!(opts.batch_size, 1000);
        assert_eq!(opts.flush_interval, Duration::from_millis(10_000));
        assert_eq!(opts.jitter_interval, Duration::from_millis(2_000));
        assert_eq!(opts.retry_interval, Duration::from_millis(5_000));
    }
}
