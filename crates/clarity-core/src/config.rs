use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ClarityError, Result};

/// Top-level configuration for the Clarity application.
///
/// Loaded from `~/.clarity/config.toml` by default. Values the user edits at
/// runtime (API key, model, interval, prompts, language, resolution) live in
/// the settings table; the fields here only seed them on first start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClarityConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ClarityConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is out of range.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClarityConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ClarityError::Config(format!(
                "capture.jpeg_quality must be within 1..=100, got {}",
                self.capture.jpeg_quality
            )));
        }
        if self.capture.interval_ms == 0 {
            return Err(ClarityError::Config(
                "capture.interval_ms must be positive".into(),
            ));
        }
        if !SUMMARY_INTERVAL_RANGE.contains(&self.summary.interval_seconds) {
            return Err(ClarityError::Config(format!(
                "summary.interval_seconds must be within {}..={}, got {}",
                SUMMARY_INTERVAL_RANGE.start(),
                SUMMARY_INTERVAL_RANGE.end(),
                self.summary.interval_seconds
            )));
        }
        if self.summary.min_frames == 0 || self.summary.catch_up_span == 0 {
            return Err(ClarityError::Config(
                "summary.min_frames and summary.catch_up_span must be positive".into(),
            ));
        }
        if self.summary.max_frames_per_window < self.summary.min_frames {
            return Err(ClarityError::Config(format!(
                "summary.max_frames_per_window ({}) must not be below summary.min_frames ({})",
                self.summary.max_frames_per_window, self.summary.min_frames
            )));
        }
        if self.summary.fps == 0 {
            return Err(ClarityError::Config("summary.fps must be positive".into()));
        }
        if self.remote.upload_attempts == 0 {
            return Err(ClarityError::Config(
                "remote.upload_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Accepted bounds for the summarization cadence, in seconds.
pub const SUMMARY_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 10..=3600;

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the database, recordings and videos.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.clarity/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Screenshot capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Milliseconds between capture attempts.
    pub interval_ms: u64,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            jpeg_quality: 85,
        }
    }
}

/// Summarization loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Initial cadence; the settings table takes over once written.
    pub interval_seconds: u64,
    /// Windows with fewer frames are skipped without a remote call.
    pub min_frames: u32,
    /// Most intervals a single catch-up window may span.
    pub catch_up_span: u32,
    /// Frames loaded into one video at most.
    pub max_frames_per_window: u32,
    /// Output frame rate of the assembled video.
    pub fps: u32,
    /// Keep assembled videos after the remote call.
    pub keep_videos: bool,
    /// Default model identifier.
    pub model: String,
    /// Default language: "en" or "zh".
    pub language: String,
    /// Default video preset: "low" or "default".
    pub video_resolution: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 45,
            min_frames: 5,
            catch_up_span: 4,
            max_frames_per_window: 3600,
            fps: 1,
            keep_videos: false,
            model: "gemini-3-flash-preview".to_string(),
            language: "zh".to_string(),
            video_resolution: "low".to_string(),
        }
    }
}

/// Remote vision service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the Generative Language API.
    pub base_url: String,
    /// Optional key used when the settings table has none.
    pub api_key: Option<String>,
    /// Upload attempts before giving up.
    pub upload_attempts: u32,
    /// First backoff delay between upload attempts.
    pub backoff_initial_ms: u64,
    /// Delay between file state polls.
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for a file to become ACTIVE.
    pub poll_timeout_ms: u64,
    /// Per-request timeout for the HTTP client.
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: None,
            upload_attempts: 3,
            backoff_initial_ms: 1000,
            poll_interval_ms: 1000,
            poll_timeout_ms: 120_000,
            request_timeout_secs: 300,
        }
    }
}

/// Local HTTP command surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 7740,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ClarityConfig::default();
        assert_eq!(config.general.data_dir, "~/.clarity/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.capture.interval_ms, 1000);
        assert_eq!(config.capture.jpeg_quality, 85);
        assert_eq!(config.summary.interval_seconds, 45);
        assert_eq!(config.summary.catch_up_span, 4);
        assert_eq!(config.summary.model, "gemini-3-flash-preview");
        assert_eq!(config.summary.language, "zh");
        assert_eq!(config.remote.upload_attempts, 3);
        assert_eq!(config.remote.poll_timeout_ms, 120_000);
        assert_eq!(config.api.port, 7740);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[summary]
interval_seconds = 120
min_frames = 3
keep_videos = true

[remote]
upload_attempts = 5
"#;
        let file = create_temp_config(content);
        let config = ClarityConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.summary.interval_seconds, 120);
        assert_eq!(config.summary.min_frames, 3);
        assert!(config.summary.keep_videos);
        // Unspecified fields keep their defaults.
        assert_eq!(config.summary.catch_up_span, 4);
        assert_eq!(config.remote.upload_attempts, 5);
        assert_eq!(config.remote.poll_interval_ms, 1000);
    }

    #[test]
    fn test_load_empty_file_uses_defaults() {
        let file = create_temp_config("");
        let config = ClarityConfig::load(file.path()).unwrap();
        assert_eq!(config.summary.interval_seconds, 45);
    }

    #[test]
    fn test_load_rejects_out_of_range_interval() {
        let file = create_temp_config("[summary]\ninterval_seconds = 5\n");
        let err = ClarityConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ClarityError::Config(_)));
    }

    #[test]
    fn test_load_rejects_bad_quality() {
        let file = create_temp_config("[capture]\njpeg_quality = 0\n");
        assert!(ClarityConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_frame_cap_below_min_frames() {
        let file = create_temp_config("[summary]\nmin_frames = 10\nmax_frames_per_window = 5\n");
        assert!(matches!(
            ClarityConfig::load(file.path()),
            Err(ClarityError::Config(_))
        ));
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("[general\ndata_dir = ");
        let err = ClarityConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ClarityError::Config(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ClarityConfig::load_or_default(Path::new("/nonexistent/clarity.toml"));
        assert_eq!(config.api.port, 7740);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClarityConfig::default();
        config.summary.interval_seconds = 300;
        config.remote.api_key = Some("k".into());
        config.save(&path).unwrap();

        let loaded = ClarityConfig::load(&path).unwrap();
        assert_eq!(loaded.summary.interval_seconds, 300);
        assert_eq!(loaded.remote.api_key.as_deref(), Some("k"));
    }
}
