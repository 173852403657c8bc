//! On-disk layout under the media root.
//!
//! ```text
//! <root>/raw/<session_id>/<kind>.<ext>   raw uploads, purged
//! <root>/thumbs/<session_id>_<file>      audit thumbnails, durable
//! <root>/work/verify-XXXX/               per-verify scratch, removed on return
//! ```

use std::path::PathBuf;

use vouch_types::{MediaKind, SessionId};

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn raw_root(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// The session's raw namespace.
    #[must_use]
    pub fn raw_dir(&self, session: SessionId) -> PathBuf {
        self.raw_root().join(session.to_string())
    }

    #[must_use]
    pub fn raw_path(&self, session: SessionId, kind: MediaKind) -> PathBuf {
        self.raw_dir(session).join(kind.file_name())
    }

    #[must_use]
    pub fn thumbs_dir(&self) -> PathBuf {
        self.root.join("thumbs")
    }

    /// Thumbnail path for `source_name`, prefixed with the session so the
    /// flat namespace never collides.
    #[must_use]
    pub fn thumb_path(&self, session: SessionId, source_name: &str) -> PathBuf {
        self.thumbs_dir().join(format!("{session}_{source_name}"))
    }

    #[must_use]
    pub fn work_root(&self) -> PathBuf {
        self.root.join("work")
    }
}
