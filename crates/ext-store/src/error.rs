//! Error types for ext-store

use std::path::PathBuf;

/// Result type for ext-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ext-store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem error from ext-fs
    #[error(transparent)]
    Fs(#[from] ext_fs::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive is unreadable or lacks a manifest.
    #[error("Invalid archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    /// A manifest failed to parse or does not describe the expected
    /// extension.
    #[error("Invalid manifest in {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// A store or catalog document failed to parse.
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Extraction into {0} was cancelled")]
    Cancelled(PathBuf),

    /// A blocking worker panicked or was aborted.
    #[error("Background task failed: {0}")]
    Join(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<Error> for ext_core::Error {
    fn from(error: Error) -> Self {
        match &error {
            Error::Archive { path, .. } | Error::Manifest { path, .. } => {
                ext_core::Error::validation(path.display().to_string(), &error)
            }
            Error::ChecksumMismatch { path, .. } => {
                ext_core::Error::download(path.display().to_string(), &error)
            }
            Error::Cancelled(path) => ext_core::Error::Cancelled(path.display().to_string()),
            Error::Join(_) => ext_core::Error::Unknown(error.to_string()),
            Error::Fs(_) | Error::Io { .. } | Error::Parse { .. } => {
                ext_core::Error::local(&error)
            }
        }
    }
}
