//! Tool error types.

use std::path::PathBuf;

use skirmish_core::error::SimError;
use thiserror::Error;

/// Errors from the development tools.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A report could not be rendered.
    #[error("cannot serialize report: {0}")]
    Serialize(String),

    /// The kernel rejected the content.
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// Result type for the tools.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Read a file to a string.
pub(crate) fn read(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ToolError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Attach the file path to a parse error raised on inline text.
pub(crate) fn with_path(err: SimError, path: &std::path::Path) -> ToolError {
    match err {
        SimError::DataParseError { message, .. } => ToolError::Sim(SimError::DataParseError {
            path: path.display().to_string(),
            message,
        }),
        other => ToolError::Sim(other),
    }
}
