use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use image::DynamicImage;
use tempfile::{NamedTempFile, TempDir};
use vouch_types::{MediaKind, SessionId};
use vouch_utils::{atomic_write, ensure_private_dir, newest_mtime, stage_bytes};

use crate::faces::FaceDetector;
use crate::frames::FrameSource;
use crate::layout::StorageLayout;
use crate::sampling::keyframe_indices;
use crate::{MediaError, quality, thumbnail};

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub keyframe_count: usize,
    pub thumbnail_box: (u32, u32),
    pub sharpness_scale: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            keyframe_count: 5,
            thumbnail_box: (256, 256),
            sharpness_scale: 1000.0,
        }
    }
}

/// Outcome of scoring the uploaded selfie.
#[derive(Debug, Clone)]
pub struct SelfieAssessment {
    /// Re-encoded JPEG inside the work area.
    pub path: PathBuf,
    pub quality_score: f64,
    pub sharpness: f64,
    pub face_count: usize,
}

/// Upload bytes on disk next to their final path, awaiting the store's say-so.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedUpload {
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged bytes into place, replacing an earlier upload.
    pub fn commit(self) -> Result<PathBuf, MediaError> {
        let Self { file, target } = self;
        file.persist(&target)
            .map_err(|e| MediaError::io(&target, e.error))?;
        Ok(target)
    }
}

/// Raw and derived media operations over a [`StorageLayout`].
///
/// Stateless apart from its collaborators; every method is blocking file or
/// subprocess work.
pub struct ArtifactPipeline {
    layout: StorageLayout,
    frames: Arc<dyn FrameSource>,
    faces: Arc<dyn FaceDetector>,
    settings: PipelineSettings,
}

impl ArtifactPipeline {
    pub fn new(
        layout: StorageLayout,
        frames: Arc<dyn FrameSource>,
        faces: Arc<dyn FaceDetector>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            layout,
            frames,
            faces,
            settings,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    #[must_use]
    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Write an upload into the session's raw namespace without exposing it.
    ///
    /// The bytes sit in a hidden temp file until [`StagedUpload::commit`]
    /// renames them over `<kind>.<ext>`; dropping the stage deletes them.
    pub fn stage_upload(
        &self,
        bytes: &[u8],
        session: SessionId,
        kind: MediaKind,
    ) -> Result<StagedUpload, MediaError> {
        let raw_root = self.layout.raw_root();
        ensure_private_dir(&raw_root).map_err(|e| MediaError::io(&raw_root, e))?;
        let dir = self.layout.raw_dir(session);
        ensure_private_dir(&dir).map_err(|e| MediaError::io(&dir, e))?;

        let file = stage_bytes(&dir, bytes).map_err(|e| MediaError::io(&dir, e))?;
        tracing::debug!(session_id = %session, %kind, bytes = bytes.len(), "raw upload staged");
        Ok(StagedUpload {
            file,
            target: self.layout.raw_path(session, kind),
        })
    }

    /// Fresh scratch directory for one verification, removed on drop.
    pub fn work_area(&self) -> Result<TempDir, MediaError> {
        let root = self.layout.work_root();
        ensure_private_dir(&root).map_err(|e| MediaError::io(&root, e))?;
        tempfile::Builder::new()
            .prefix("verify-")
            .tempdir_in(&root)
            .map_err(|e| MediaError::io(&root, e))
    }

    /// Sample up to `count` keyframes from `video` into `work_dir` as JPEGs.
    ///
    /// Frames that fail to decode are skipped; a clip shorter than `count`
    /// frames yields as many distinct frames as it has.
    pub fn extract_keyframes(
        &self,
        video: &Path,
        count: usize,
        work_dir: &Path,
    ) -> Result<Vec<PathBuf>, MediaError> {
        let total = self.frames.frame_count(video)?;
        let indices = keyframe_indices(total, count);

        let mut keyframes = Vec::with_capacity(indices.len());
        for index in indices {
            let Some(frame) = self.frames.decode_frame(video, index)? else {
                continue;
            };
            let path = work_dir.join(format!("keyframe_{}.jpg", keyframes.len()));
            write_jpeg(&frame, &path)?;
            keyframes.push(path);
        }

        tracing::debug!(
            video = %video.display(),
            total,
            sampled = keyframes.len(),
            "keyframes extracted"
        );
        Ok(keyframes)
    }

    /// Score the selfie and re-encode it into `work_dir`.
    ///
    /// Zero or several faces force the quality score to 0 without failing.
    pub fn score_and_select_selfie(
        &self,
        image_path: &Path,
        work_dir: &Path,
    ) -> Result<SelfieAssessment, MediaError> {
        let image = load_image(image_path)?;
        let gray = image.to_luma8();
        let sharpness = quality::laplacian_variance(&gray);
        let face_count = self.faces.count_faces(&gray)?;
        let quality_score =
            quality::quality_score(sharpness, face_count, self.settings.sharpness_scale);

        let path = work_dir.join("selfie_processed.jpg");
        write_jpeg(&image, &path)?;
        Ok(SelfieAssessment {
            path,
            quality_score,
            sharpness,
            face_count,
        })
    }

    /// Write a durable thumbnail of `image_path` for `session`.
    pub fn generate_thumbnail(
        &self,
        image_path: &Path,
        session: SessionId,
        target_box: (u32, u32),
    ) -> Result<PathBuf, MediaError> {
        let image = load_image(image_path)?;
        let thumb = thumbnail::render(&image, target_box);

        let source_name = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| MediaError::unreadable(image_path, "path has no file name"))?;
        let thumbs = self.layout.thumbs_dir();
        fs::create_dir_all(&thumbs).map_err(|e| MediaError::io(&thumbs, e))?;

        let path = self.layout.thumb_path(session, &source_name);
        write_jpeg(&thumb, &path)?;
        Ok(path)
    }

    /// Recursively delete the session's raw namespace.
    ///
    /// Returns whether anything was removed. Thumbnails are never touched.
    pub fn cleanup_session(&self, session: SessionId) -> Result<bool, MediaError> {
        let dir = self.layout.raw_dir(session);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(session_id = %session, "raw media purged");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MediaError::io(&dir, e)),
        }
    }

    /// Sessions whose raw namespace has not been modified for longer than `ttl`.
    pub fn stale_raw_namespaces(
        &self,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<Vec<SessionId>, MediaError> {
        let raw_root = self.layout.raw_root();
        let entries = match fs::read_dir(&raw_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MediaError::io(&raw_root, e)),
        };

        let mut stale = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MediaError::io(&raw_root, e))?;
            let Some(session) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<SessionId>().ok())
            else {
                continue;
            };
            let modified = match newest_mtime(&entry.path()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(MediaError::io(entry.path(), e)),
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > ttl {
                stale.push(session);
            }
        }
        Ok(stale)
    }
}

/// Read a stored media file in full.
pub fn read_media(path: &Path) -> Result<Vec<u8>, MediaError> {
    fs::read(path).map_err(|e| MediaError::io(path, e))
}

fn load_image(path: &Path) -> Result<DynamicImage, MediaError> {
    let bytes = read_media(path)?;
    // Raw images are stored as .jpg whatever their encoding; sniff the bytes.
    image::load_from_memory(&bytes).map_err(|e| MediaError::unreadable(path, e))
}

fn write_jpeg(image: &DynamicImage, path: &Path) -> Result<(), MediaError> {
    let bytes = thumbnail::encode_jpeg(image).map_err(|e| MediaError::unreadable(path, e))?;
    atomic_write(path, &bytes).map_err(|e| MediaError::io(path, e))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};

    use super::*;
    use crate::faces::DisabledFaceDetector;

    /// Synthetic clip of `total` frames; indices in `broken` fail to decode.
    struct SyntheticClip {
        total: u64,
        broken: HashSet<u64>,
    }

    impl SyntheticClip {
        fn new(total: u64) -> Self {
            Self {
                total,
                broken: HashSet::new(),
            }
        }
    }

    impl FrameSource for SyntheticClip {
        fn frame_count(&self, video: &Path) -> Result<u64, MediaError> {
            fs::metadata(video).map_err(|e| MediaError::io(video, e))?;
            Ok(self.total)
        }

        fn decode_frame(&self, _video: &Path, index: u64) -> Result<Option<DynamicImage>, MediaError> {
            if self.broken.contains(&index) {
                return Ok(None);
            }
            let shade = (index * 40 % 255) as u8;
            Ok(Some(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                32,
                24,
                Rgb([shade, shade, shade]),
            ))))
        }
    }

    struct FixedFaces(usize);

    impl FaceDetector for FixedFaces {
        fn count_faces(&self, _image: &GrayImage) -> Result<usize, MediaError> {
            Ok(self.0)
        }
    }

    fn pipeline(root: &Path, clip: SyntheticClip, faces: usize) -> ArtifactPipeline {
        ArtifactPipeline::new(
            StorageLayout::new(root),
            Arc::new(clip),
            Arc::new(FixedFaces(faces)),
            PipelineSettings::default(),
        )
    }

    fn sharp_png() -> Vec<u8> {
        let image = GrayImage::from_fn(64, 48, |x, y| {
            if (x + y) % 2 == 0 { Luma([255]) } else { Luma([0]) }
        });
        let mut buf = io::Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(image)
            .write_to(&mut buf, ImageFormat::Png)
            .expect("encode png");
        buf.into_inner()
    }

    fn save(pipeline: &ArtifactPipeline, bytes: &[u8], id: SessionId, kind: MediaKind) -> PathBuf {
        pipeline
            .stage_upload(bytes, id, kind)
            .expect("stage")
            .commit()
            .expect("commit")
    }

    #[test]
    fn staged_upload_is_hidden_until_committed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), SyntheticClip::new(0), 1);
        let id = SessionId::generate();
        let raw_dir = pipeline.layout().raw_dir(id);

        let staged = pipeline
            .stage_upload(b"selfie bytes", id, MediaKind::Selfie)
            .expect("stage");
        assert!(!staged.target().exists());
        assert_eq!(fs::read_dir(&raw_dir).unwrap().count(), 1);
        drop(staged);
        assert_eq!(fs::read_dir(&raw_dir).unwrap().count(), 0);

        let staged = pipeline
            .stage_upload(b"selfie bytes", id, MediaKind::Selfie)
            .expect("stage again");
        let path = staged.commit().expect("commit");
        assert_eq!(path, raw_dir.join("selfie.jpg"));
        assert_eq!(fs::read(&path).unwrap(), b"selfie bytes");
        assert_eq!(fs::read_dir(&raw_dir).unwrap().count(), 1);
    }

    #[test]
    fn committed_uploads_land_in_session_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), SyntheticClip::new(0), 1);
        let id = SessionId::generate();

        let path = save(&pipeline, b"mp4 bytes", id, MediaKind::AvClip);
        assert_eq!(path, dir.path().join("raw").join(id.to_string()).join("av_clip.mp4"));
        assert_eq!(fs::read(&path).unwrap(), b"mp4 bytes");

        save(&pipeline, b"replaced", id, MediaKind::AvClip);
        assert_eq!(fs::read(&path).unwrap(), b"replaced");
    }

    #[test]
    fn short_clip_yields_at_most_its_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), SyntheticClip::new(3), 1);
        let id = SessionId::generate();
        let video = save(&pipeline, b"clip", id, MediaKind::AvClip);
        let work = pipeline.work_area().expect("work");

        let frames = pipeline.extract_keyframes(&video, 5, work.path()).expect("extract");
        assert!(frames.len() <= 3);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(image::open(frame).is_ok());
        }
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut clip = SyntheticClip::new(100);
        clip.broken.insert(33);
        let pipeline = pipeline(dir.path(), clip, 1);
        let id = SessionId::generate();
        let video = save(&pipeline, b"clip", id, MediaKind::AvClip);
        let work = pipeline.work_area().expect("work");

        let frames = pipeline.extract_keyframes(&video, 5, work.path()).expect("extract");
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3], work.path().join("keyframe_3.jpg"));
    }

    #[test]
    fn purged_clip_fails_with_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), SyntheticClip::new(10), 1);
        let id = SessionId::generate();
        let work = pipeline.work_area().expect("work");

        let err = pipeline
            .extract_keyframes(&pipeline.layout().raw_path(id, MediaKind::AvClip), 5, work.path())
            .unwrap_err();
        assert!(matches!(
            vouch_types::VouchError::from(err),
            vouch_types::VouchError::MediaProcessing(_)
        ));
    }

    #[test]
    fn selfie_quality_needs_exactly_one_face() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = SessionId::generate();

        for (faces, expect_positive) in [(0, false), (1, true), (2, false)] {
            let pipeline = pipeline(dir.path(), SyntheticClip::new(0), faces);
            let selfie = save(&pipeline, &sharp_png(), id, MediaKind::Selfie);
            let work = pipeline.work_area().expect("work");

            let assessment = pipeline
                .score_and_select_selfie(&selfie, work.path())
                .expect("score");
            assert!(assessment.sharpness > 0.0);
            assert_eq!(assessment.face_count, faces);
            assert_eq!(assessment.quality_score > 0.0, expect_positive, "faces={faces}");
            assert!(image::open(&assessment.path).is_ok());
        }
    }

    #[test]
    fn corrupt_selfie_is_unreadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), SyntheticClip::new(0), 1);
        let id = SessionId::generate();
        let selfie = save(&pipeline, b"not an image", id, MediaKind::Selfie);
        let work = pipeline.work_area().expect("work");

        let err = pipeline.score_and_select_selfie(&selfie, work.path()).unwrap_err();
        assert!(matches!(err, MediaError::Unreadable { .. }));
    }

    #[test]
    fn thumbnail_fits_box_and_lands_in_flat_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), SyntheticClip::new(0), 1);
        let id = SessionId::generate();
        let doc = save(&pipeline, &sharp_png(), id, MediaKind::DocFront);

        let thumb = pipeline.generate_thumbnail(&doc, id, (256, 256)).expect("thumb");
        assert_eq!(thumb, dir.path().join("thumbs").join(format!("{id}_doc_front.jpg")));
        let decoded = image::open(&thumb).expect("decode thumb");
        assert_eq!(decoded.width(), 256);
        assert_eq!(decoded.height(), 192);
    }

    #[test]
    fn cleanup_is_idempotent_and_spares_thumbnails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path(), SyntheticClip::new(0), 1);
        let id = SessionId::generate();

        assert!(!pipeline.cleanup_session(id).expect("absent namespace"));

        let doc = save(&pipeline, &sharp_png(), id, MediaKind::DocFront);
        let thumb = pipeline.generate_thumbnail(&doc, id, (64, 64)).unwrap();

        assert!(pipeline.cleanup_session(id).expect("first cleanup"));
        assert!(!pipeline.cleanup_session(id).expect("second cleanup"));
        assert!(!pipeline.layout().raw_dir(id).exists());
        assert!(thumb.exists());
    }

    #[test]
    fn stale_namespaces_respect_ttl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = ArtifactPipeline::new(
            StorageLayout::new(dir.path()),
            Arc::new(SyntheticClip::new(0)),
            Arc::new(DisabledFaceDetector),
            PipelineSettings::default(),
        );
        let old = SessionId::generate();
        let fresh = SessionId::generate();
        save(&pipeline, b"a", old, MediaKind::Selfie);
        save(&pipeline, b"b", fresh, MediaKind::Selfie);
        fs::create_dir_all(dir.path().join("raw").join("not-a-session")).unwrap();

        let ttl = Duration::from_secs(48 * 3600);
        let later = SystemTime::now() + Duration::from_secs(49 * 3600);
        let mut stale = pipeline.stale_raw_namespaces(ttl, later).expect("scan");
        stale.sort();
        let mut expected = vec![old, fresh];
        expected.sort();
        assert_eq!(stale, expected);

        assert!(pipeline
            .stale_raw_namespaces(ttl, SystemTime::now())
            .expect("scan")
            .is_empty());
    }

    #[test]
    fn stale_scan_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(&dir.path().join("nothing"), SyntheticClip::new(0), 1);
        assert!(pipeline
            .stale_raw_namespaces(Duration::from_secs(1), SystemTime::now())
            .unwrap()
            .is_empty());
    }
}
