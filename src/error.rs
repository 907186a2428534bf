use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Ez3dError>;

#[derive(Debug, Error)]
pub enum Ez3dError {
    /// A required setting is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The OAuth flow could not be set up or completed.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// A Sheets or Drive call failed.
    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Ez3dError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Errors that end the current cycle but leave the next one free to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Io { .. })
    }
}
