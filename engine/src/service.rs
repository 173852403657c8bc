use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use vouch_decision::DecisionEngine;
use vouch_media::ArtifactPipeline;
use vouch_store::SessionRepository;
use vouch_types::{
    MediaArtifact, MediaKind, Session, SessionId, VerificationResult, VouchError, VouchResult,
};

use crate::orchestrator::{VerificationOrchestrator, VerifyRequest};
use crate::pool::{BlockingPool, run_blocking};
use crate::retention::{RetentionPolicy, RetentionScheduler};

#[derive(Debug, Clone)]
pub struct VouchOptions {
    pub worker_threads: usize,
    pub decision_timeout: Duration,
    pub default_callback_url: Option<String>,
    pub retention: RetentionPolicy,
}

impl Default for VouchOptions {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            decision_timeout: Duration::from_secs(120),
            default_callback_url: None,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Session operations in the order a caller drives them:
/// create, upload, complete, verify, then read the result.
pub struct Vouch {
    store: Arc<dyn SessionRepository>,
    pipeline: Arc<ArtifactPipeline>,
    pool: BlockingPool,
    orchestrator: VerificationOrchestrator,
    retention: RetentionScheduler,
    options: VouchOptions,
}

impl Vouch {
    pub fn new(
        store: Arc<dyn SessionRepository>,
        pipeline: Arc<ArtifactPipeline>,
        engine: Arc<dyn DecisionEngine>,
        options: VouchOptions,
    ) -> Self {
        let pool = BlockingPool::new(options.worker_threads);
        let orchestrator = VerificationOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&pipeline),
            engine,
            pool.clone(),
            options.decision_timeout,
        );
        let retention =
            RetentionScheduler::new(Arc::clone(&pipeline), pool.clone(), options.retention);
        Self {
            store,
            pipeline,
            pool,
            orchestrator,
            retention,
            options,
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &ArtifactPipeline {
        &self.pipeline
    }

    pub async fn create_session(
        &self,
        callback_url: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> VouchResult<Session> {
        let callback_url = callback_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.options.default_callback_url.clone());
        let store = Arc::clone(&self.store);
        let session = run_blocking(move || {
            store.create_session(callback_url, metadata.unwrap_or_default())
        })
        .await?;
        tracing::info!(session_id = %session.id, "session created");
        Ok(session)
    }

    pub async fn session(&self, id: SessionId) -> VouchResult<Session> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.get_session(id)).await
    }

    /// Accept one upload. `kind` is the wire name (`doc_front`, ...).
    pub async fn upload(
        &self,
        id: SessionId,
        kind: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> VouchResult<MediaArtifact> {
        let kind: MediaKind = kind
            .parse()
            .map_err(|_| VouchError::UnknownKind(kind.to_string()))?;
        let mime_type = mime_type.to_string();
        let size = bytes.len();
        let store = Arc::clone(&self.store);
        let pipeline = Arc::clone(&self.pipeline);

        let artifact = self
            .pool
            .run(move || {
                // Cheap early refusal so a bad request never writes bytes.
                // The store re-checks both inside its transaction.
                let status = store.get_session(id)?.status;
                if !status.accepts_uploads() {
                    return Err(VouchError::invalid_state(status, "upload to"));
                }
                if !kind.accepts_mime(&mime_type) {
                    return Err(VouchError::UnsupportedMedia { kind, mime_type });
                }

                let mut staged = Some(pipeline.stage_upload(&bytes, id, kind).map_err(|e| {
                    tracing::error!(session_id = %id, %kind, error = %e, "staging upload failed");
                    VouchError::from(e)
                })?);
                let mut publish = || {
                    let staged = staged
                        .take()
                        .ok_or_else(|| VouchError::Storage("upload already published".into()))?;
                    staged.commit().map_err(|e| {
                        tracing::error!(session_id = %id, %kind, error = %e, "publishing upload failed");
                        VouchError::from(e)
                    })
                };
                store.record_upload(id, kind, &mime_type, &mut publish)
            })
            .await?;
        tracing::info!(session_id = %id, %kind, bytes = size, "upload recorded");
        Ok(artifact)
    }

    pub async fn complete(&self, id: SessionId) -> VouchResult<Session> {
        let store = Arc::clone(&self.store);
        let session = run_blocking(move || store.mark_media_complete(id)).await?;
        tracing::info!(session_id = %id, status = %session.status, "media marked complete");
        Ok(session)
    }

    pub async fn verify(
        &self,
        id: SessionId,
        request: VerifyRequest,
    ) -> VouchResult<VerificationResult> {
        self.orchestrator.verify(id, request).await
    }

    /// The persisted verdict. A session still awaiting one is `InvalidState`.
    pub async fn result(&self, id: SessionId) -> VouchResult<VerificationResult> {
        let store = Arc::clone(&self.store);
        run_blocking(move || {
            let session = store.get_session(id)?;
            store
                .get_result(id)?
                .ok_or_else(|| VouchError::invalid_state(session.status, "read the result of"))
        })
        .await
    }

    /// Retention job over the same media root, sharing the worker pool.
    /// Every handle shares one guard, so sweeps never overlap.
    #[must_use]
    pub fn retention(&self) -> RetentionScheduler {
        self.retention.clone()
    }
}
