#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use serde_json::{Map, Value};
use vouch_decision::{DecisionEngine, DecisionError, DecisionFut, DecisionRequest, verdict_from_value};
use vouch_engine::{Vouch, VouchOptions};
use vouch_media::{
    ArtifactPipeline, FaceDetector, FrameSource, MediaError, PipelineSettings, StorageLayout,
};
use vouch_store::{Publish, SessionRepository, SqliteSessionStore};
use vouch_types::{
    MediaArtifact, MediaKind, Session, SessionId, VerificationResult, Verdict, VouchError,
    VouchResult,
};

/// Clip of `total` flat frames; only checks the file still exists.
pub struct StubFrames {
    pub total: u64,
}

impl FrameSource for StubFrames {
    fn frame_count(&self, video: &Path) -> Result<u64, MediaError> {
        std::fs::metadata(video).map_err(|source| MediaError::Io {
            path: video.to_path_buf(),
            source,
        })?;
        Ok(self.total)
    }

    fn decode_frame(&self, _video: &Path, index: u64) -> Result<Option<DynamicImage>, MediaError> {
        let shade = (index * 30 % 255) as u8;
        Ok(Some(DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([shade, 90, 160])))))
    }
}

pub struct OneFace;

impl FaceDetector for OneFace {
    fn count_faces(&self, _image: &GrayImage) -> Result<usize, MediaError> {
        Ok(1)
    }
}

/// Answers every request with a fixed JSON value and records what it saw.
pub struct StubEngine {
    pub answer: Value,
    pub calls: AtomicUsize,
    pub last_images: std::sync::Mutex<Vec<String>>,
}

impl StubEngine {
    pub fn new(answer: Value) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
            last_images: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DecisionEngine for StubEngine {
    fn decide<'a>(&'a self, _session: SessionId, request: &'a DecisionRequest) -> DecisionFut<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_images.lock().unwrap() =
                request.ordered_images().into_iter().map(|(name, _)| name.to_string()).collect();
            verdict_from_value(self.answer.clone())
        })
    }
}

/// Never answers.
pub struct HangingEngine;

impl DecisionEngine for HangingEngine {
    fn decide<'a>(&'a self, _session: SessionId, _request: &'a DecisionRequest) -> DecisionFut<'a> {
        Box::pin(async {
            std::future::pending::<()>().await;
            Err(DecisionError::Unavailable("unreachable".into()))
        })
    }
}

pub fn decision(status: &str) -> Value {
    serde_json::json!({
        "overall": {"status": status, "score": 0.91},
        "ocr": {"name": "JANE DOE"},
        "face_match": 0.95,
        "liveness_active": {"score": 0.9},
        "av_sync": 0.85,
        "audio_spoof_guess": 0.05,
        "explanations": ["document intact", "same person"]
    })
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = GrayImage::from_fn(width, height, |x, y| {
        if (x / 2 + y / 2) % 2 == 0 { Luma([230]) } else { Luma([20]) }
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .to_rgb8()
        .write_to(&mut buf, ImageFormat::Jpeg)
        .expect("encode jpeg");
    buf.into_inner()
}

pub fn pipeline(root: &Path) -> Arc<ArtifactPipeline> {
    Arc::new(ArtifactPipeline::new(
        StorageLayout::new(root),
        Arc::new(StubFrames { total: 3 }),
        Arc::new(OneFace),
        PipelineSettings::default(),
    ))
}

pub fn service(
    root: &Path,
    store: Arc<dyn SessionRepository>,
    engine: Arc<dyn DecisionEngine>,
) -> Vouch {
    Vouch::new(store, pipeline(root), engine, VouchOptions::default())
}

pub fn sqlite() -> Arc<SqliteSessionStore> {
    Arc::new(SqliteSessionStore::open_in_memory().expect("open store"))
}

/// Create a session and upload doc_front, selfie and av_clip.
pub async fn uploaded_session(vouch: &Vouch) -> SessionId {
    let id = vouch.create_session(None, None).await.expect("create").id;
    vouch.upload(id, "doc_front", "image/jpeg", jpeg(120, 80)).await.expect("doc_front");
    vouch.upload(id, "selfie", "image/jpeg", jpeg(60, 90)).await.expect("selfie");
    vouch.upload(id, "av_clip", "video/mp4", b"not really mp4".to_vec()).await.expect("av_clip");
    id
}

/// Repository whose artifact listing forgets one kind, as if the row
/// vanished between completion and verification.
pub struct ForgetfulStore {
    pub inner: Arc<SqliteSessionStore>,
    pub forget: MediaKind,
    pub armed: std::sync::atomic::AtomicBool,
}

impl SessionRepository for ForgetfulStore {
    fn create_session(&self, callback_url: Option<String>, metadata: Map<String, Value>) -> VouchResult<Session> {
        self.inner.create_session(callback_url, metadata)
    }

    fn get_session(&self, id: SessionId) -> VouchResult<Session> {
        self.inner.get_session(id)
    }

    fn list_artifacts(&self, id: SessionId) -> VouchResult<Vec<MediaArtifact>> {
        let mut artifacts = self.inner.list_artifacts(id)?;
        if self.armed.load(Ordering::SeqCst) {
            artifacts.retain(|artifact| artifact.kind != self.forget);
        }
        Ok(artifacts)
    }

    fn record_upload(
        &self,
        id: SessionId,
        kind: MediaKind,
        mime_type: &str,
        publish: Publish<'_>,
    ) -> VouchResult<MediaArtifact> {
        self.inner.record_upload(id, kind, mime_type, publish)
    }

    fn mark_media_complete(&self, id: SessionId) -> VouchResult<Session> {
        self.inner.mark_media_complete(id)
    }

    fn commit_verdict(&self, id: SessionId, verdict: &Verdict) -> VouchResult<VerificationResult> {
        self.inner.commit_verdict(id, verdict)
    }

    fn get_result(&self, id: SessionId) -> VouchResult<Option<VerificationResult>> {
        self.inner.get_result(id)
    }
}

/// Repository that, whenever it is asked to publish, first records how many
/// bytes already sit staged in the session's raw namespace. `refuse` makes
/// it turn every upload down without publishing.
pub struct StagingWitness {
    pub inner: Arc<SqliteSessionStore>,
    pub raw_root: PathBuf,
    pub refuse: bool,
    pub staged_at_publish: std::sync::Mutex<Vec<u64>>,
}

impl StagingWitness {
    pub fn new(inner: Arc<SqliteSessionStore>, raw_root: PathBuf) -> Self {
        Self {
            inner,
            raw_root,
            refuse: false,
            staged_at_publish: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl SessionRepository for StagingWitness {
    fn create_session(&self, callback_url: Option<String>, metadata: Map<String, Value>) -> VouchResult<Session> {
        self.inner.create_session(callback_url, metadata)
    }

    fn get_session(&self, id: SessionId) -> VouchResult<Session> {
        self.inner.get_session(id)
    }

    fn list_artifacts(&self, id: SessionId) -> VouchResult<Vec<MediaArtifact>> {
        self.inner.list_artifacts(id)
    }

    fn record_upload(
        &self,
        id: SessionId,
        kind: MediaKind,
        mime_type: &str,
        publish: Publish<'_>,
    ) -> VouchResult<MediaArtifact> {
        if self.refuse {
            let status = self.inner.get_session(id)?.status;
            return Err(VouchError::invalid_state(status, "upload to"));
        }
        let raw_dir = self.raw_root.join(id.to_string());
        let mut witnessed = || {
            let staged: u64 = std::fs::read_dir(&raw_dir)
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".staged-"))
                        .filter_map(|entry| entry.metadata().ok())
                        .map(|meta| meta.len())
                        .sum()
                })
                .unwrap_or_default();
            self.staged_at_publish.lock().unwrap().push(staged);
            publish()
        };
        self.inner.record_upload(id, kind, mime_type, &mut witnessed)
    }

    fn mark_media_complete(&self, id: SessionId) -> VouchResult<Session> {
        self.inner.mark_media_complete(id)
    }

    fn commit_verdict(&self, id: SessionId, verdict: &Verdict) -> VouchResult<VerificationResult> {
        self.inner.commit_verdict(id, verdict)
    }

    fn get_result(&self, id: SessionId) -> VouchResult<Option<VerificationResult>> {
        self.inner.get_result(id)
    }
}

/// Sorted entry names directly under `dir`; empty when it does not exist.
pub fn files_under(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
