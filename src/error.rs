use crate::features::FeatureSchema;
use std::path::PathBuf;

/// Failure inside a single prediction call. Never fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error("unknown category '{value}' for column '{column}'")]
    UnknownCategory { column: String, value: String },

    #[error("input does not match artifact schema: {0}")]
    SchemaMismatch(String),

    #[error("model produced a non-finite log-price ({0})")]
    NonFiniteOutput(f64),

    #[error("model backend: {0}")]
    Backend(String),
}

/// Failure to make an artifact available. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found at {}", .0.display())]
    Missing(PathBuf),

    #[error("artifact at {} is {size} bytes, expected at least {min}", path.display())]
    Undersized { path: PathBuf, size: u64, min: u64 },

    #[error("artifact download from {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("artifact io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid artifact contract: {0}")]
    Contract(String),

    #[error("configured feature schema {configured} does not match artifact schema {artifact}")]
    SchemaMismatch {
        configured: FeatureSchema,
        artifact: FeatureSchema,
    },

    #[error("model backend: {0}")]
    Backend(String),
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }
}
