use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while preparing data or driving a training run.
#[derive(Debug, Error)]
pub enum KotobaError {
    /// The run configuration is unusable: empty corpus, empty label list,
    /// a token/tag length mismatch, or an unknown tag at batch time.
    #[error("configuration error: {reason}")]
    Config {
        /// What exactly is wrong.
        reason: String,
    },

    /// A dataset split document could not be read or has the wrong shape.
    #[error("failed to load dataset {path:?}: {reason}")]
    Dataset {
        /// The offending split file.
        path: PathBuf,
        /// What exactly is wrong with it.
        reason: String,
    },

    /// A filesystem resource (artifact dir, checkpoint, scratch file)
    /// could not be created or written.
    #[error("resource error at {path:?}: {source}")]
    Resource {
        /// The offending path.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pretrained word-vector provider failed (bad file, failed download).
    #[error("embedding provider error: {reason}")]
    Embedding {
        /// What went wrong while loading or fetching vectors.
        reason: String,
    },

    /// The external scorer failed or produced output we refuse to guess at.
    #[error("scoring error: {reason}")]
    Scoring {
        /// Subprocess failure or the unexpected output shape.
        reason: String,
    },

    /// Tensor math failed inside candle.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// JSON (de)serialization of an artifact failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl KotobaError {
    /// Shorthand for a configuration error with a formatted reason.
    pub fn config(reason: impl Into<String>) -> Self {
        KotobaError::Config {
            reason: reason.into(),
        }
    }

    /// Shorthand for a scoring error with a formatted reason.
    pub fn scoring(reason: impl Into<String>) -> Self {
        KotobaError::Scoring {
            reason: reason.into(),
        }
    }
}

/// Result type alias for kotoba operations.
pub type Result<T> = std::result::Result<T, KotobaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = KotobaError::config("empty training corpus");
        assert_eq!(err.to_string(), "configuration error: empty training corpus");

        let err = KotobaError::scoring("scorer exited with status 2");
        assert!(err.to_string().contains("status 2"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KotobaError>();
    }
}
