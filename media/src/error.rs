use std::io;
use std::path::PathBuf;

use thiserror::Error;
use vouch_types::VouchError;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("cannot decode {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MediaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Unreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<MediaError> for VouchError {
    fn from(err: MediaError) -> Self {
        match &err {
            // A raw file that vanished underneath us (e.g. purged) is a
            // processing failure the caller can retry, not a storage fault.
            MediaError::Io { source, .. } if source.kind() != io::ErrorKind::NotFound => {
                VouchError::Storage(err.to_string())
            }
            _ => VouchError::MediaProcessing(err.to_string()),
        }
    }
}
