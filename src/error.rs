//! Error types for waveform extraction.

use crate::UnitId;

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid extraction options. Raised before any trace is read.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the invalid option.
        message: String,
    },

    /// A unit task failed. Results of every other unit are discarded.
    #[error("extraction failed for unit {unit}: {source}")]
    Aggregation {
        /// Unit whose task failed.
        unit: UnitId,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The recording could not answer a request.
    #[error("recording error: {message}")]
    Recording {
        /// Description of the failure.
        message: String,
    },

    /// The sorting could not answer a request.
    #[error("sorting error: {message}")]
    Sorting {
        /// Description of the failure.
        message: String,
    },

    /// Out-of-core store failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal invariant did not hold. Indicates a bug, not bad input.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the broken invariant.
        message: String,
    },

    /// Array shape mismatch.
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn recording(message: impl Into<String>) -> Self {
        Self::Recording {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn sorting(message: impl Into<String>) -> Self {
        Self::Sorting {
            message: message.into(),
        }
    }

    /// Returns `true` for errors raised by option validation.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns `true` for broken internal invariants.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}
