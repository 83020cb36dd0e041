use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the viewer core.
///
/// Only [`ViewerError::DocumentLoad`] is fatal to a window; everything else is
/// reported and the viewer keeps running.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("failed to open {path:?}: {source}")]
    DocumentLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("scale factor must be positive and finite, got {0}")]
    InvalidScale(f64),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Why the correspondence index could not serve a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("no correspondence index found for {0:?}")]
    NotFound(PathBuf),
    #[error("failed to load correspondence index {path:?}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("correspondence index query failed: {0}")]
    Query(String),
}

pub type ViewerResult<T> = Result<T, ViewerError>;
