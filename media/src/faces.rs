//! Face counting.

use std::path::PathBuf;

use image::GrayImage;
use rustface::ImageData;

use crate::MediaError;

pub trait FaceDetector: Send + Sync {
    fn count_faces(&self, image: &GrayImage) -> Result<usize, MediaError>;
}

/// Smallest face, in pixels, the cascade looks for.
const MIN_FACE_SIZE: u32 = 40;

/// SeetaFace cascade detector loaded from a model file.
#[derive(Debug, Clone)]
pub struct SeetaFaceDetector {
    model_path: PathBuf,
}

impl SeetaFaceDetector {
    pub fn new(model_path: impl Into<PathBuf>) -> Result<Self, MediaError> {
        let model_path = model_path.into();
        if !model_path.is_file() {
            return Err(MediaError::Tool {
                tool: "face detector",
                message: format!("model not found at {}", model_path.display()),
            });
        }
        Ok(Self { model_path })
    }
}

impl FaceDetector for SeetaFaceDetector {
    fn count_faces(&self, image: &GrayImage) -> Result<usize, MediaError> {
        let model = self.model_path.to_string_lossy();
        // The detector keeps mutable scratch state, so each call builds its own.
        let mut detector = rustface::create_detector(&model).map_err(|e| MediaError::Tool {
            tool: "face detector",
            message: format!("failed to load {model}: {e}"),
        })?;
        detector.set_min_face_size(MIN_FACE_SIZE);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let (width, height) = image.dimensions();
        let mut data = ImageData::new(image.as_raw(), width, height);
        let faces = detector.detect(&mut data);
        Ok(faces.len())
    }
}

/// Reports zero faces. Used when no detection model is configured, which
/// forces every selfie quality score to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFaceDetector;

impl FaceDetector for DisabledFaceDetector {
    fn count_faces(&self, _image: &GrayImage) -> Result<usize, MediaError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_rejected_up_front() {
        let err = SeetaFaceDetector::new("/nonexistent/seeta_fd_frontal_v1.0.bin").unwrap_err();
        assert!(matches!(err, MediaError::Tool { .. }));
    }

    #[test]
    fn disabled_detector_sees_nothing() {
        let image = GrayImage::new(8, 8);
        assert_eq!(DisabledFaceDetector.count_faces(&image).unwrap(), 0);
    }
}
