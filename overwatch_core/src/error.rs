//! Error taxonomy of the core.
//!
//! None of these are fatal: callers drop the offending item (malformed input),
//! return an empty result (insufficient history) or fall back to a neutral
//! default (numeric degeneracy).

use sensor_models::ReadingError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("insufficient history: need {needed} entries, have {have}")]
    InsufficientHistory { needed: usize, have: usize },

    #[error("numerically degenerate input: {0}")]
    NumericDegenerate(&'static str),

    #[error("innovation covariance is singular")]
    SingularInnovation,

    #[error("unknown sensor kind `{0}`")]
    UnknownSensor(String),

    #[error("unknown context tag `{0}`")]
    UnknownContext(String),

    #[error("alert delivery failed: {0}")]
    AlertDelivery(String),

    #[error(transparent)]
    Reading(ReadingError),
}

impl From<ReadingError> for CoreError {
    fn from(err: ReadingError) -> Self {
        match err {
            ReadingError::UnknownSensor(kind) => CoreError::UnknownSensor(kind),
            other => CoreError::Reading(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
