//! Persistence for Vouch sessions.
//!
//! [`SessionRepository`] is the seam the service consumes; every write that
//! depends on session status re-checks that status inside its own storage
//! transaction, never against an earlier read. [`SqliteSessionStore`] is the
//! production implementation.

mod sqlite;
mod sqlite_security;

use std::path::PathBuf;

use serde_json::{Map, Value};
use vouch_types::{
    MediaArtifact, MediaKind, Session, SessionId, VerificationResult, Verdict, VouchResult,
};

pub use sqlite::SqliteSessionStore;

/// Moves an already-written upload into place once the store has accepted
/// it and returns the storage locator. Runs inside the write transaction
/// while the store is held, so it should only rename; an error rolls the
/// transaction back.
pub type Publish<'a> = &'a mut dyn FnMut() -> VouchResult<PathBuf>;

pub trait SessionRepository: Send + Sync {
    /// Insert a new session in status `created`.
    fn create_session(
        &self,
        callback_url: Option<String>,
        metadata: Map<String, Value>,
    ) -> VouchResult<Session>;

    fn get_session(&self, id: SessionId) -> VouchResult<Session>;

    fn list_artifacts(&self, id: SessionId) -> VouchResult<Vec<MediaArtifact>>;

    /// Record one upload and move the session to `uploading`.
    ///
    /// Fails `InvalidState` unless the session accepts uploads and
    /// `UnsupportedMedia` when `mime_type` is not whitelisted for `kind`.
    /// `publish` is only invoked after both checks pass.
    fn record_upload(
        &self,
        id: SessionId,
        kind: MediaKind,
        mime_type: &str,
        publish: Publish<'_>,
    ) -> VouchResult<MediaArtifact>;

    /// Move the session to `media_complete` once every required kind is present.
    fn mark_media_complete(&self, id: SessionId) -> VouchResult<Session>;

    /// Persist the verdict and move the session to its terminal status as one unit.
    fn commit_verdict(&self, id: SessionId, verdict: &Verdict) -> VouchResult<VerificationResult>;

    fn get_result(&self, id: SessionId) -> VouchResult<Option<VerificationResult>>;
}
