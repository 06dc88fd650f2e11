use std::io;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Object retrieval failures
// ---------------------------------------------------------------------------

/// Why an object could not be fetched from a [`crate::data::source::ObjectSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("object {container}/{key} not found")]
    NotFound { container: String, key: String },

    #[error("access denied to {container}/{key}")]
    AccessDenied { container: String, key: String },

    #[error("transient failure fetching {container}/{key}: {message}")]
    Transient {
        container: String,
        key: String,
        message: String,
    },
}

impl SourceError {
    /// Classify an I/O failure against the object it was reading.
    pub fn from_io(err: &io::Error, container: &str, key: &str) -> Self {
        let container = container.to_string();
        let key = key.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound { container, key },
            io::ErrorKind::PermissionDenied => SourceError::AccessDenied { container, key },
            _ => SourceError::Transient {
                container,
                key,
                message: err.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Every failure the load → cache → filter → aggregate pipeline can report.
///
/// Degenerate data (no rows, zero totals, all-null groups) is never an error;
/// it surfaces as an explicit value in the aggregation result instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The remote object could not be retrieved.
    #[error("dataset {dataset} unavailable")]
    SourceUnavailable {
        dataset: String,
        #[source]
        cause: SourceError,
    },

    /// The retrieved bytes do not form the expected table.
    #[error("failed to decode dataset {dataset}: {detail}")]
    Decode { dataset: String, detail: String },

    /// A filter or aggregation request does not fit the dataset schema.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn decode(dataset: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::Decode {
            dataset: dataset.into(),
            detail: detail.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, PipelineError::SourceUnavailable { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, PipelineError::Decode { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Settings errors
// ---------------------------------------------------------------------------

/// Failure while reading [`crate::config::PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("reading config file")]
    Io(#[from] io::Error),

    #[error("parsing config file")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_source_taxonomy() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            SourceError::from_io(&missing, "bucket", "a.csv"),
            SourceError::NotFound { .. }
        ));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            SourceError::from_io(&denied, "bucket", "a.csv"),
            SourceError::AccessDenied { .. }
        ));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        match SourceError::from_io(&reset, "bucket", "a.csv") {
            SourceError::Transient { message, .. } => assert!(message.contains("reset")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn source_unavailable_keeps_cause() {
        let err = PipelineError::SourceUnavailable {
            dataset: "bucket/a.csv".into(),
            cause: SourceError::NotFound {
                container: "bucket".into(),
                key: "a.csv".into(),
            },
        };
        assert!(err.is_source_unavailable());
        let cause = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(cause.as_deref(), Some("object bucket/a.csv not found"));
    }
}
