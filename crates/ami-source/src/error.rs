//! Data source error types.

use std::path::PathBuf;

use thiserror::Error;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("data source not selected")]
    NotSelected,

    #[error("data source already open at {0}; close it before selecting another")]
    AlreadyOpen(String),

    #[error("data source unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("data source at {0} failed to open; close it before retrying")]
    Failed(String),

    #[error("read error on {locator}: {source}")]
    Read {
        locator: String,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Whether this error means the source could not be opened.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. } | SourceError::Failed(_))
    }
}
