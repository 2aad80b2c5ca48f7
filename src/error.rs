//! Error types for the capcast pipeline.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// A specialized Result type for capcast operations.
pub type Result<T> = result::Result<T, Error>;

/// Pipeline stage an error escaped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Normalize,
    Fit,
    Predict,
    Format,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Fit => "fit",
            Stage::Predict => "predict",
            Stage::Format => "format",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

/// The error type for capcast operations.
#[derive(Debug)]
pub enum Error {
    /// No observations were available to build a series
    EmptySeries,
    /// Fewer observations than the configured minimum
    InsufficientData { required: usize, actual: usize },
    /// The forecasting model could not be fitted
    ModelFit(String),
    /// A prediction row carried a non-finite field
    MalformedRow {
        index: usize,
        field: &'static str,
        value: f64,
    },
    /// Telemetry source errors (query rejected, undecodable response)
    Source(String),
    /// Telemetry sink errors (write rejected, retries exhausted)
    Sink(String),
    /// Configuration errors
    Config(String),
    /// Invalid argument errors
    InvalidArgument(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// I/O errors
    Io(std::io::Error),
    /// Transport errors from the HTTP client
    Http(reqwest::Error),
    /// An error annotated with the entity and stage it escaped from
    Stage {
        entity: String,
        stage: Stage,
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps this error with the entity and stage it was raised in.
    pub fn in_stage(self, entity: impl Into<String>, stage: Stage) -> Self {
        Error::Stage {
            entity: entity.into(),
            stage,
            source: Box::new(self),
        }
    }

    /// The innermost error, with any stage annotations peeled off.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors caused by the input data rather than the environment.
    pub fn is_data_quality(&self) -> bool {
        matches!(
            self.root(),
            Error::EmptySeries | Error::InsufficientData { .. } | Error::MalformedRow { .. }
        )
    }

    /// The stage recorded on this error, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptySeries => write!(f, "Empty series: no observations to forecast from"),
            Error::InsufficientData { required, actual } => write!(
                f,
                "Insufficient data: need at least {} points, got {}",
                required, actual
            ),
            Error::ModelFit(msg) => write!(f, "Model fit error: {}", msg),
            Error::MalformedRow { index, field, value } => write!(
                f,
                "Malformed row {}: field '{}' is not finite ({})",
                index, field, value
            ),
            Error::Source(msg) => write!(f, "Source error: {}", msg),
            Error::Sink(msg) => write!(f, "Sink error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Http(err) => write!(f, "HTTP error: {}", err),
            Error::Stage {
                entity,
                stage,
                source,
            } => write!(f, "[{}] {} stage failed: {}", entity, stage, source),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Http(err) => Some(err),
            Error::Stage { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
