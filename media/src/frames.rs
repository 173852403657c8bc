//! Video frame decoding.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use image::DynamicImage;

use crate::MediaError;

/// Decodes individual frames from a stored video.
pub trait FrameSource: Send + Sync {
    /// Number of decodable frames in the video's first video stream.
    fn frame_count(&self, video: &Path) -> Result<u64, MediaError>;

    /// Decode frame `index`. `Ok(None)` means that frame could not be decoded
    /// and should be skipped.
    fn decode_frame(&self, video: &Path, index: u64) -> Result<Option<DynamicImage>, MediaError>;
}

/// [`FrameSource`] backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegFrameSource {
    #[must_use]
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Use the configured binaries, falling back to `PATH` lookup.
    pub fn locate(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Result<Self, MediaError> {
        Ok(Self::new(resolve("ffmpeg", ffmpeg)?, resolve("ffprobe", ffprobe)?))
    }
}

fn run(tool: &'static str, command: &mut Command) -> Result<Output, MediaError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| MediaError::Tool {
            tool,
            message: format!("failed to spawn: {e}"),
        })
}

fn resolve(name: &'static str, configured: Option<&Path>) -> Result<PathBuf, MediaError> {
    let candidate = configured.unwrap_or_else(|| Path::new(name));
    which::which(candidate).map_err(|e| MediaError::Tool {
        tool: name,
        message: format!("{} not found: {e}", candidate.display()),
    })
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(511)
        .map_or(0, |(idx, _)| idx);
    trimmed[start..].to_string()
}

fn ensure_exists(video: &Path) -> Result<(), MediaError> {
    std::fs::metadata(video)
        .map(|_| ())
        .map_err(|e| MediaError::io(video, e))
}

impl FrameSource for FfmpegFrameSource {
    fn frame_count(&self, video: &Path) -> Result<u64, MediaError> {
        ensure_exists(video)?;
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "error", "-select_streams", "v:0", "-count_packets"])
            .args(["-show_entries", "stream=nb_read_packets", "-of", "csv=p=0"])
            .arg(video);

        let output = run("ffprobe", &mut command)?;
        if !output.status.success() {
            return Err(MediaError::unreadable(video, stderr_tail(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| line.trim_end_matches(',').parse::<u64>().ok())
            .ok_or_else(|| MediaError::unreadable(video, "no video stream"))
    }

    fn decode_frame(&self, video: &Path, index: u64) -> Result<Option<DynamicImage>, MediaError> {
        ensure_exists(video)?;
        let filter = format!("select=eq(n\\,{index})");
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(video)
            .arg("-vf")
            .arg(&filter)
            .args(["-vframes", "1", "-an", "-f", "image2pipe", "-vcodec", "png", "-"]);

        let output = run("ffmpeg", &mut command)?;
        if !output.status.success() || output.stdout.is_empty() {
            tracing::debug!(
                video = %video.display(),
                index,
                stderr = %stderr_tail(&output),
                "frame did not decode; skipping"
            );
            return Ok(None);
        }
        match image::load_from_memory(&output.stdout) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                tracing::debug!(video = %video.display(), index, "frame bytes unreadable: {e}");
                Ok(None)
            }
        }
    }
}
