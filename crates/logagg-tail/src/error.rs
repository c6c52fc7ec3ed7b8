//! Error types for the file IO boundary.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TailError {
    /// The underlying IO error.
    pub fn io(&self) -> &std::io::Error {
        match self {
            Self::Open { source, .. } | Self::Read { source, .. } | Self::Write { source, .. } => {
                source
            }
        }
    }

    /// True when the file is gone; discovery retires it on its next pass.
    pub fn is_not_found(&self) -> bool {
        self.io().kind() == std::io::ErrorKind::NotFound
    }
}
