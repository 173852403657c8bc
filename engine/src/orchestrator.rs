use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tempfile::TempDir;
use vouch_decision::{DecisionEngine, DecisionImage, DecisionRequest, LivenessTimings};
use vouch_media::{ArtifactPipeline, MediaError, read_media};
use vouch_store::SessionRepository;
use vouch_types::{
    MediaArtifact, MediaKind, SessionId, SessionStatus, VerificationResult, VouchError,
    VouchResult, missing_required_kinds,
};

use crate::pool::{BlockingPool, run_blocking};

/// Caller-supplied context for one verification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyRequest {
    #[serde(default)]
    pub expected_phrase: Option<String>,
    #[serde(default)]
    pub timings: Option<LivenessTimings>,
}

/// Everything produced from the raw media for one decision call.
///
/// Owns the work area; dropping it removes the transient files.
struct Evidence {
    work: TempDir,
    images: BTreeMap<String, DecisionImage>,
    thumbnails: Vec<PathBuf>,
    selfie_quality: f64,
    face_count: usize,
}

pub struct VerificationOrchestrator {
    store: Arc<dyn SessionRepository>,
    pipeline: Arc<ArtifactPipeline>,
    engine: Arc<dyn DecisionEngine>,
    pool: BlockingPool,
    decision_timeout: Duration,
}

impl VerificationOrchestrator {
    pub fn new(
        store: Arc<dyn SessionRepository>,
        pipeline: Arc<ArtifactPipeline>,
        engine: Arc<dyn DecisionEngine>,
        pool: BlockingPool,
        decision_timeout: Duration,
    ) -> Self {
        Self {
            store,
            pipeline,
            engine,
            pool,
            decision_timeout,
        }
    }

    /// Run the full verification for a session whose media is complete.
    ///
    /// Nothing is written until the verdict commits; every earlier failure
    /// leaves the session at `media_complete` so the caller can retry.
    pub async fn verify(
        &self,
        id: SessionId,
        request: VerifyRequest,
    ) -> VouchResult<VerificationResult> {
        let started = Instant::now();

        let store = Arc::clone(&self.store);
        let session = run_blocking(move || store.get_session(id)).await?;
        if session.status != SessionStatus::MediaComplete {
            return Err(VouchError::invalid_state(session.status, "verify"));
        }

        // Status and media rows are not updated atomically together.
        let store = Arc::clone(&self.store);
        let artifacts = run_blocking(move || store.list_artifacts(id)).await?;
        let missing = missing_required_kinds(artifacts.iter().map(|artifact| &artifact.kind));
        if !missing.is_empty() {
            tracing::warn!(session_id = %id, ?missing, "media rows missing at verify");
            return Err(VouchError::IncompleteMedia { missing });
        }

        let pipeline = Arc::clone(&self.pipeline);
        let evidence = self
            .pool
            .run(move || {
                prepare_evidence(&pipeline, id, &artifacts).map_err(|e| {
                    tracing::error!(session_id = %id, error = %e, "media processing failed");
                    VouchError::from(e)
                })
            })
            .await?;
        tracing::info!(
            session_id = %id,
            selfie_quality = evidence.selfie_quality,
            faces = evidence.face_count,
            images = evidence.images.len(),
            thumbnails = evidence.thumbnails.len(),
            "evidence prepared"
        );

        let timings = request
            .timings
            .unwrap_or_default()
            .or(LivenessTimings::from_metadata(&session.metadata));
        let decision_request = DecisionRequest {
            images: evidence.images,
            transcript: String::new(),
            expected_phrase: request.expected_phrase.unwrap_or_default(),
            timings,
        };

        let decided =
            tokio::time::timeout(self.decision_timeout, self.engine.decide(id, &decision_request))
                .await;
        let verdict = match decided {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                tracing::error!(session_id = %id, error = %e, "decision failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::error!(
                    session_id = %id,
                    timeout_s = self.decision_timeout.as_secs(),
                    "decision timed out"
                );
                return Err(VouchError::DecisionUnavailable(format!(
                    "no decision within {}s",
                    self.decision_timeout.as_secs()
                )));
            }
        };
        drop(decision_request);
        drop(evidence.work);

        let store = Arc::clone(&self.store);
        let result = run_blocking(move || store.commit_verdict(id, &verdict)).await?;

        let pipeline = Arc::clone(&self.pipeline);
        if let Err(e) = self
            .pool
            .run(move || pipeline.cleanup_session(id).map_err(VouchError::from))
            .await
        {
            tracing::warn!(session_id = %id, error = %e, "raw media cleanup failed after verdict");
        }

        tracing::info!(
            session_id = %id,
            decision = %result.verdict.status,
            status = %result.session_status(),
            elapsed_ms = started.elapsed().as_millis(),
            "verification committed"
        );
        Ok(result)
    }
}

fn prepare_evidence(
    pipeline: &ArtifactPipeline,
    session: SessionId,
    artifacts: &[MediaArtifact],
) -> Result<Evidence, MediaError> {
    let settings = pipeline.settings();
    let find = |kind: MediaKind| artifacts.iter().find(|artifact| artifact.kind == kind);
    let require = |kind: MediaKind| {
        find(kind).ok_or_else(|| MediaError::Unreadable {
            path: pipeline.layout().raw_path(session, kind),
            reason: format!("no {kind} artifact recorded"),
        })
    };
    let selfie = require(MediaKind::Selfie)?;
    let clip = require(MediaKind::AvClip)?;

    let work = pipeline.work_area()?;
    let mut images = BTreeMap::new();
    let mut thumbnails = Vec::new();

    for kind in [MediaKind::DocFront, MediaKind::DocBack] {
        let Some(doc) = find(kind) else { continue };
        let bytes = read_media(&doc.locator)?;
        thumbnails.push(pipeline.generate_thumbnail(&doc.locator, session, settings.thumbnail_box)?);
        images.insert(kind.as_str().to_string(), DecisionImage::new(&doc.mime_type, bytes));
    }

    let assessment = pipeline.score_and_select_selfie(&selfie.locator, work.path())?;
    thumbnails.push(pipeline.generate_thumbnail(&assessment.path, session, settings.thumbnail_box)?);
    images.insert(
        MediaKind::Selfie.as_str().to_string(),
        DecisionImage::new("image/jpeg", read_media(&assessment.path)?),
    );

    let keyframes = pipeline.extract_keyframes(&clip.locator, settings.keyframe_count, work.path())?;
    for (index, frame) in keyframes.iter().enumerate() {
        images.insert(
            format!("keyframe_{index}"),
            DecisionImage::new("image/jpeg", read_media(frame)?),
        );
    }

    Ok(Evidence {
        work,
        images,
        thumbnails,
        selfie_quality: assessment.quality_score,
        face_count: assessment.face_count,
    })
}
