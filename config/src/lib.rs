//! Configuration for Vouch.
//!
//! A TOML file is deserialized into raw `Option` sections, then resolved into
//! one immutable [`VouchConfig`] with every default filled in and every value
//! validated. The resolved value is built once at startup and passed around
//! explicitly.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [storage]
//! database_path = "./vouch.sqlite3"
//! media_root = "./media"
//!
//! [retention]
//! raw_ttl_hours = 48
//! sweep_interval_minutes = 60
//!
//! [media]
//! keyframe_count = 5
//! thumbnail_box = [256, 256]
//!
//! [decision]
//! api_key = "${GEMINI_API_KEY}"
//! model = "gemini-2.5-flash"
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "VOUCH_CONFIG";
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";
pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw file shape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub server: Option<RawServer>,
    pub storage: Option<RawStorage>,
    pub retention: Option<RawRetention>,
    pub media: Option<RawMedia>,
    pub decision: Option<RawDecision>,
    pub session: Option<RawSession>,
    pub log: Option<RawLog>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawServer {
    pub bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawStorage {
    pub database_path: Option<String>,
    pub media_root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawRetention {
    pub raw_ttl_hours: Option<u64>,
    pub sweep_interval_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMedia {
    pub keyframe_count: Option<usize>,
    pub thumbnail_box: Option<[u32; 2]>,
    pub sharpness_scale: Option<f64>,
    pub worker_threads: Option<usize>,
    pub ffmpeg_binary: Option<String>,
    pub ffprobe_binary: Option<String>,
    pub face_model_path: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct RawDecision {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub prompts_dir: Option<String>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl fmt::Debug for RawDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDecision")
            .field(
                "api_key",
                &if self.api_key.is_some() { "[REDACTED]" } else { "None" },
            )
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .field("prompts_dir", &self.prompts_dir)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSession {
    pub default_callback_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawLog {
    pub file: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Secret API key. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub media_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub raw_ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub keyframe_count: usize,
    /// Thumbnail bounding box as (width, height).
    pub thumbnail_box: (u32, u32),
    pub sharpness_scale: f64,
    pub worker_threads: usize,
    pub ffmpeg_binary: Option<PathBuf>,
    pub ffprobe_binary: Option<PathBuf>,
    pub face_model_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub prompts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub default_callback_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VouchConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub media: MediaConfig,
    pub decision: DecisionConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

impl Default for VouchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            },
            storage: StorageConfig {
                database_path: PathBuf::from("./vouch.sqlite3"),
                media_root: PathBuf::from("./media"),
            },
            retention: RetentionConfig {
                raw_ttl: Duration::from_secs(48 * 3600),
                sweep_interval: Duration::from_secs(60 * 60),
            },
            media: MediaConfig {
                keyframe_count: 5,
                thumbnail_box: (256, 256),
                sharpness_scale: 1000.0,
                worker_threads: 4,
                ffmpeg_binary: None,
                ffprobe_binary: None,
                face_model_path: None,
            },
            decision: DecisionConfig {
                api_key: None,
                model: DEFAULT_MODEL.to_string(),
                base_url: GEMINI_API_BASE_URL.to_string(),
                timeout: Duration::from_secs(120),
                max_output_tokens: 1000,
                temperature: 0.1,
                prompts_dir: None,
            },
            session: SessionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl VouchConfig {
    /// Load from the first config file found, or defaults when none exists.
    ///
    /// Returns the path that was read, if any.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let lookup = |name: &str| env::var(name).ok();
        match config_path() {
            Some(path) => {
                let config = Self::from_file(&path, lookup)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::resolve(RawConfig::default(), lookup)?, None)),
        }
    }

    pub fn from_file(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        warn_if_exposed(path, &content);
        let raw: RawConfig = toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::resolve(raw, lookup)
    }

    /// Fill defaults, expand `${VAR}` references and validate.
    ///
    /// `lookup` resolves environment variables so callers can inject them.
    pub fn resolve(
        raw: RawConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let expand = |value: String| expand_env_vars_with(&value, &lookup);

        if let Some(server) = raw.server
            && let Some(bind) = server.bind
        {
            let bind = expand(bind);
            config.server.bind = bind
                .parse()
                .map_err(|e| ConfigError::invalid("server.bind", format!("'{bind}': {e}")))?;
        }

        if let Some(storage) = raw.storage {
            if let Some(path) = storage.database_path {
                config.storage.database_path = PathBuf::from(expand(path));
            }
            if let Some(root) = storage.media_root {
                config.storage.media_root = PathBuf::from(expand(root));
            }
        }

        if let Some(retention) = raw.retention {
            if let Some(hours) = retention.raw_ttl_hours {
                if hours == 0 {
                    return Err(ConfigError::invalid("retention.raw_ttl_hours", "must be > 0"));
                }
                config.retention.raw_ttl = hours
                    .checked_mul(3600)
                    .map(Duration::from_secs)
                    .ok_or_else(|| ConfigError::invalid("retention.raw_ttl_hours", "too large"))?;
            }
            if let Some(minutes) = retention.sweep_interval_minutes {
                if minutes == 0 {
                    return Err(ConfigError::invalid(
                        "retention.sweep_interval_minutes",
                        "must be > 0",
                    ));
                }
                config.retention.sweep_interval = minutes
                    .checked_mul(60)
                    .map(Duration::from_secs)
                    .ok_or_else(|| {
                        ConfigError::invalid("retention.sweep_interval_minutes", "too large")
                    })?;
            }
        }

        if let Some(media) = raw.media {
            resolve_media(&mut config.media, media, &expand)?;
        }

        if let Some(decision) = raw.decision {
            resolve_decision(&mut config.decision, decision, &expand)?;
        }
        if config.decision.api_key.is_none() {
            config.decision.api_key = lookup(API_KEY_ENV_VAR)
                .filter(|key| !key.trim().is_empty())
                .map(ApiKey::new);
        }

        if let Some(session) = raw.session {
            config.session.default_callback_url = session
                .default_callback_url
                .map(expand)
                .filter(|url| !url.trim().is_empty());
            if let Some(callback) = &config.session.default_callback_url {
                url::Url::parse(callback).map_err(|e| {
                    ConfigError::invalid("session.default_callback_url", e.to_string())
                })?;
            }
        }

        if let Some(log) = raw.log {
            config.log.file = log.file.map(expand).map(PathBuf::from);
        }

        Ok(config)
    }
}

fn resolve_media(
    media: &mut MediaConfig,
    raw: RawMedia,
    expand: &impl Fn(String) -> String,
) -> Result<(), ConfigError> {
    if let Some(count) = raw.keyframe_count {
        if count == 0 {
            return Err(ConfigError::invalid("media.keyframe_count", "must be > 0"));
        }
        media.keyframe_count = count;
    }
    if let Some([width, height]) = raw.thumbnail_box {
        if width == 0 || height == 0 {
            return Err(ConfigError::invalid(
                "media.thumbnail_box",
                "both dimensions must be > 0",
            ));
        }
        media.thumbnail_box = (width, height);
    }
    if let Some(scale) = raw.sharpness_scale {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ConfigError::invalid(
                "media.sharpness_scale",
                format!("{scale} must be a positive number"),
            ));
        }
        media.sharpness_scale = scale;
    }
    if let Some(threads) = raw.worker_threads {
        if threads == 0 {
            return Err(ConfigError::invalid("media.worker_threads", "must be > 0"));
        }
        media.worker_threads = threads;
    }
    media.ffmpeg_binary = raw.ffmpeg_binary.map(expand).map(PathBuf::from);
    media.ffprobe_binary = raw.ffprobe_binary.map(expand).map(PathBuf::from);
    media.face_model_path = raw.face_model_path.map(expand).map(PathBuf::from);
    Ok(())
}

fn resolve_decision(
    decision: &mut DecisionConfig,
    raw: RawDecision,
    expand: &impl Fn(String) -> String,
) -> Result<(), ConfigError> {
    decision.api_key = raw
        .api_key
        .map(expand)
        .filter(|key| !key.trim().is_empty())
        .map(ApiKey::new);
    if let Some(model) = raw.model.map(expand)
        && !model.trim().is_empty()
    {
        decision.model = model.trim().to_string();
    }
    if let Some(base_url) = raw.base_url.map(expand) {
        url::Url::parse(&base_url)
            .map_err(|e| ConfigError::invalid("decision.base_url", e.to_string()))?;
        decision.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(seconds) = raw.timeout_seconds {
        if seconds == 0 {
            return Err(ConfigError::invalid("decision.timeout_seconds", "must be > 0"));
        }
        decision.timeout = Duration::from_secs(seconds);
    }
    if let Some(tokens) = raw.max_output_tokens {
        if tokens == 0 {
            return Err(ConfigError::invalid("decision.max_output_tokens", "must be > 0"));
        }
        decision.max_output_tokens = tokens;
    }
    if let Some(temperature) = raw.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::invalid(
                "decision.temperature",
                format!("{temperature} is outside [0, 2]"),
            ));
        }
        decision.temperature = temperature;
    }
    decision.prompts_dir = raw.prompts_dir.map(expand).map(PathBuf::from);
    Ok(())
}

/// First existing config file: `$VOUCH_CONFIG`, `./vouch.toml`, then the
/// per-user config directory.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = env::var(CONFIG_ENV_VAR)
        && !explicit.trim().is_empty()
    {
        return Some(PathBuf::from(explicit));
    }
    let local = PathBuf::from("vouch.toml");
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("vouch").join("config.toml"))
        .filter(|path| path.is_file())
}

/// Expand `${VAR}` references using `lookup`. Unknown variables become empty;
/// an unclosed `${` is kept verbatim.
fn expand_env_vars_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if !name.is_empty() {
                    out.push_str(&lookup(name).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Warn when a config holding a literal API key is readable by others.
fn warn_if_exposed(path: &Path, content: &str) {
    let has_literal_key = content.lines().any(|line| {
        let line = line.trim();
        line.starts_with("api_key") && !line.contains("${")
    });
    if !has_literal_key {
        return;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};
        let Ok(metadata) = fs::metadata(path) else {
            return;
        };
        // SAFETY: getuid has no preconditions and cannot fail.
        let our_uid = unsafe { libc::getuid() };
        let mode = metadata.permissions().mode() & 0o777;
        if metadata.uid() == our_uid && mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = %format!("{mode:o}"),
                "Config file holds a literal API key and is readable by other users; \
                 chmod 600 it or use ${{GEMINI_API_KEY}}"
            );
        }
    }
    #[cfg(not(unix))]
    {
        tracing::warn!(
            path = %path.display(),
            "Config file may contain a literal API key. Consider ${{GEMINI_API_KEY}} instead."
        );
    }
}
