//! Media handling for Vouch.
//!
//! Everything here is synchronous, file-based work meant to run on a blocking
//! pool:
//!
//! - **`layout`**: where raw uploads, thumbnails and work areas live
//! - **`sampling`**: deterministic keyframe indices
//! - **`quality`**: Laplacian sharpness and selfie quality scoring
//! - **`thumbnail`**: aspect-preserving thumbnails
//! - **`frames`** / **`faces`**: video decoding and face counting seams
//! - **`pipeline`**: the operations the service calls

mod error;
pub mod faces;
pub mod frames;
pub mod layout;
mod pipeline;
pub mod quality;
pub mod sampling;
pub mod thumbnail;

pub use error::MediaError;
pub use faces::{DisabledFaceDetector, FaceDetector, SeetaFaceDetector};
pub use frames::{FfmpegFrameSource, FrameSource};
pub use layout::StorageLayout;
pub use pipeline::{ArtifactPipeline, PipelineSettings, SelfieAssessment, StagedUpload, read_media};
