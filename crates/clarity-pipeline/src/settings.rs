//! User-editable settings, held in memory and persisted to the settings table.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use clarity_core::config::{ClarityConfig, SUMMARY_INTERVAL_RANGE};
use clarity_core::error::ClarityError;
use clarity_core::types::{Language, VideoResolution};
use clarity_storage::SettingsRepository;

use crate::prompts;

pub const KEY_API_KEY: &str = "gemini_api_key";
pub const KEY_MODEL: &str = "ai_model";
pub const KEY_INTERVAL: &str = "summary_interval_seconds";
pub const KEY_PROMPT_EN: &str = "ai_prompt_en";
pub const KEY_PROMPT_ZH: &str = "ai_prompt_zh";
pub const KEY_LANGUAGE: &str = "language";
pub const KEY_VIDEO_RESOLUTION: &str = "video_resolution";

fn prompt_key(language: Language) -> &'static str {
    match language {
        Language::En => KEY_PROMPT_EN,
        Language::Zh => KEY_PROMPT_ZH,
    }
}

/// Current values of every runtime setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub summary_interval_seconds: u64,
    pub prompt_en: String,
    pub prompt_zh: String,
    pub language: Language,
    pub video_resolution: VideoResolution,
}

impl SettingsSnapshot {
    /// Values used before anything has been stored.
    pub fn from_config(config: &ClarityConfig) -> Self {
        let summary = &config.summary;
        Self {
            api_key: config
                .remote
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
            model: summary.model.clone(),
            summary_interval_seconds: summary.interval_seconds,
            prompt_en: prompts::default_video_prompt(Language::En).to_string(),
            prompt_zh: prompts::default_video_prompt(Language::Zh).to_string(),
            language: summary.language.parse().unwrap_or_else(|e| {
                warn!(error = %e, "Invalid summary.language, using default");
                Language::default()
            }),
            video_resolution: summary.video_resolution.parse().unwrap_or_else(|e| {
                warn!(error = %e, "Invalid summary.video_resolution, using default");
                VideoResolution::default()
            }),
        }
    }

    pub fn prompt(&self, language: Language) -> &str {
        match language {
            Language::En => &self.prompt_en,
            Language::Zh => &self.prompt_zh,
        }
    }

    /// Prompt in the currently selected language.
    pub fn active_prompt(&self) -> &str {
        self.prompt(self.language)
    }
}

/// Runtime settings store.
///
/// Every setter validates, writes the settings table, then updates memory,
/// so a failed write leaves the in-memory value unchanged.
pub struct RuntimeSettings {
    repo: SettingsRepository,
    values: RwLock<SettingsSnapshot>,
}

impl RuntimeSettings {
    /// Load stored values on top of the config defaults.
    ///
    /// Stored values that no longer parse are ignored with a warning.
    pub fn load(repo: SettingsRepository, config: &ClarityConfig) -> Result<Self, ClarityError> {
        let mut values = SettingsSnapshot::from_config(config);

        if let Some(key) = repo.get(KEY_API_KEY)?.filter(|k| !k.trim().is_empty()) {
            values.api_key = Some(key);
        }
        if let Some(model) = repo.get(KEY_MODEL)?.filter(|m| !m.trim().is_empty()) {
            values.model = model;
        }
        if let Some(raw) = repo.get(KEY_INTERVAL)? {
            match raw.parse::<u64>() {
                Ok(secs) if SUMMARY_INTERVAL_RANGE.contains(&secs) => {
                    values.summary_interval_seconds = secs
                }
                _ => warn!(value = %raw, "Ignoring stored summary interval"),
            }
        }
        if let Some(prompt) = repo.get(KEY_PROMPT_EN)? {
            values.prompt_en = prompt;
        }
        if let Some(prompt) = repo.get(KEY_PROMPT_ZH)? {
            values.prompt_zh = prompt;
        }
        if let Some(raw) = repo.get(KEY_LANGUAGE)? {
            match raw.parse() {
                Ok(language) => values.language = language,
                Err(e) => warn!(error = %e, "Ignoring stored language"),
            }
        }
        if let Some(raw) = repo.get(KEY_VIDEO_RESOLUTION)? {
            match raw.parse() {
                Ok(resolution) => values.video_resolution = resolution,
                Err(e) => warn!(error = %e, "Ignoring stored video resolution"),
            }
        }

        info!(
            model = %values.model,
            interval_secs = values.summary_interval_seconds,
            language = %values.language,
            resolution = %values.video_resolution,
            has_api_key = values.api_key.is_some(),
            "Runtime settings loaded"
        );

        Ok(Self {
            repo,
            values: RwLock::new(values),
        })
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        self.read().clone()
    }

    pub fn api_key(&self) -> Option<String> {
        self.read().api_key.clone()
    }

    /// Store the API key. A blank key clears it.
    pub fn set_api_key(&self, key: &str) -> Result<(), ClarityError> {
        let key = key.trim();
        if key.is_empty() {
            self.repo.delete(KEY_API_KEY)?;
            self.write().api_key = None;
            info!("API key cleared");
        } else {
            self.repo.set(KEY_API_KEY, key)?;
            self.write().api_key = Some(key.to_string());
            info!("API key updated");
        }
        Ok(())
    }

    pub fn model(&self) -> String {
        self.read().model.clone()
    }

    pub fn set_model(&self, model: &str) -> Result<(), ClarityError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(ClarityError::Config("model must not be empty".into()));
        }
        self.repo.set(KEY_MODEL, model)?;
        self.write().model = model.to_string();
        info!(model, "Model updated");
        Ok(())
    }

    pub fn summary_interval_seconds(&self) -> u64 {
        self.read().summary_interval_seconds
    }

    pub fn set_summary_interval_seconds(&self, seconds: u64) -> Result<(), ClarityError> {
        if !SUMMARY_INTERVAL_RANGE.contains(&seconds) {
            return Err(ClarityError::Config(format!(
                "summary interval must be within {}..={} seconds, got {}",
                SUMMARY_INTERVAL_RANGE.start(),
                SUMMARY_INTERVAL_RANGE.end(),
                seconds
            )));
        }
        self.repo.set(KEY_INTERVAL, &seconds.to_string())?;
        self.write().summary_interval_seconds = seconds;
        info!(seconds, "Summary interval updated");
        Ok(())
    }

    pub fn prompt(&self, language: Language) -> String {
        self.read().prompt(language).to_string()
    }

    pub fn set_prompt(&self, language: Language, prompt: &str) -> Result<(), ClarityError> {
        if prompt.trim().is_empty() {
            return Err(ClarityError::Config("prompt must not be empty".into()));
        }
        self.repo.set(prompt_key(language), prompt)?;
        let mut values = self.write();
        match language {
            Language::En => values.prompt_en = prompt.to_string(),
            Language::Zh => values.prompt_zh = prompt.to_string(),
        }
        info!(%language, "Prompt updated");
        Ok(())
    }

    /// Drop the stored override and return the built-in prompt.
    pub fn reset_prompt(&self, language: Language) -> Result<String, ClarityError> {
        self.repo.delete(prompt_key(language))?;
        let default = prompts::default_video_prompt(language).to_string();
        let mut values = self.write();
        match language {
            Language::En => values.prompt_en = default.clone(),
            Language::Zh => values.prompt_zh = default.clone(),
        }
        info!(%language, "Prompt reset to default");
        Ok(default)
    }

    pub fn language(&self) -> Language {
        self.read().language
    }

    pub fn set_language(&self, language: Language) -> Result<(), ClarityError> {
        self.repo.set(KEY_LANGUAGE, language.as_str())?;
        self.write().language = language;
        info!(%language, "Language updated");
        Ok(())
    }

    pub fn video_resolution(&self) -> VideoResolution {
        self.read().video_resolution
    }

    pub fn set_video_resolution(&self, resolution: VideoResolution) -> Result<(), ClarityError> {
        self.repo.set(KEY_VIDEO_RESOLUTION, resolution.as_str())?;
        self.write().video_resolution = resolution;
        info!(%resolution, "Video resolution updated");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, SettingsSnapshot> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SettingsSnapshot> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RuntimeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.read();
        f.debug_struct("RuntimeSettings")
            .field("model", &values.model)
            .field("summary_interval_seconds", &values.summary_interval_seconds)
            .field("language", &values.language)
            .field("video_resolution", &values.video_resolution)
            .field("has_api_key", &values.api_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarity_storage::Database;
    use std::sync::Arc;

    fn repo(db: &Arc<Database>) -> SettingsRepository {
        SettingsRepository::new(Arc::clone(db))
    }

    #[test]
    fn test_defaults_from_config() {
        let db = Arc::new(Database::in_memory().unwrap());
        let settings = RuntimeSettings::load(repo(&db), &ClarityConfig::default()).unwrap();
        let snapshot = settings.snapshot();
        assert_eq!(snapshot.api_key, None);
        assert_eq!(snapshot.model, "gemini-3-flash-preview");
        assert_eq!(snapshot.summary_interval_seconds, 45);
        assert_eq!(snapshot.language, Language::Zh);
        assert_eq!(snapshot.video_resolution, VideoResolution::Low);
        assert!(snapshot.active_prompt().starts_with("分析"));
    }

    #[test]
    fn test_values_survive_reload() {
        let db = Arc::new(Database::in_memory().unwrap());
        let settings = RuntimeSettings::load(repo(&db), &ClarityConfig::default()).unwrap();
        settings.set_api_key("  secret  ").unwrap();
        settings.set_model("gemini-2.5-pro").unwrap();
        settings.set_summary_interval_seconds(120).unwrap();
        settings.set_language(Language::En).unwrap();
        settings.set_video_resolution(VideoResolution::Default).unwrap();
        settings.set_prompt(Language::En, "Describe it").unwrap();

        let reloaded = RuntimeSettings::load(repo(&db), &ClarityConfig::default()).unwrap();
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.api_key.as_deref(), Some("secret"));
        assert_eq!(snapshot.model, "gemini-2.5-pro");
        assert_eq!(snapshot.summary_interval_seconds, 120);
        assert_eq!(snapshot.language, Language::En);
        assert_eq!(snapshot.video_resolution, VideoResolution::Default);
        assert_eq!(snapshot.active_prompt(), "Describe it");
    }

    #[test]
    fn test_interval_bounds() {
        let db = Arc::new(Database::in_memory().unwrap());
        let settings = RuntimeSettings::load(repo(&db), &ClarityConfig::default()).unwrap();
        assert!(settings.set_summary_interval_seconds(10).is_ok());
        assert!(settings.set_summary_interval_seconds(3600).is_ok());
        assert!(matches!(
            settings.set_summary_interval_seconds(9),
            Err(ClarityError::Config(_))
        ));
        assert!(settings.set_summary_interval_seconds(3601).is_err());
        assert_eq!(settings.summary_interval_seconds(), 3600);
    }

    #[test]
    fn test_reset_prompt_restores_default() {
        let db = Arc::new(Database::in_memory().unwrap());
        let settings = RuntimeSettings::load(repo(&db), &ClarityConfig::default()).unwrap();
        settings.set_prompt(Language::Zh, "自定义").unwrap();
        assert_eq!(settings.prompt(Language::Zh), "自定义");

        let restored = settings.reset_prompt(Language::Zh).unwrap();
        assert_eq!(restored, prompts::default_video_prompt(Language::Zh));
        assert_eq!(repo(&db).get(KEY_PROMPT_ZH).unwrap(), None);
    }

    #[test]
    fn test_blank_api_key_clears() {
        let db = Arc::new(Database::in_memory().unwrap());
        let settings = RuntimeSettings::load(repo(&db), &ClarityConfig::default()).unwrap();
        settings.set_api_key("k").unwrap();
        settings.set_api_key("   ").unwrap();
        assert_eq!(settings.api_key(), None);
        assert_eq!(repo(&db).get(KEY_API_KEY).unwrap(), None);
    }

    #[test]
    fn test_invalid_stored_values_ignored() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = repo(&db);
        store.set(KEY_INTERVAL, "5").unwrap();
        store.set(KEY_LANGUAGE, "fr").unwrap();
        let settings = RuntimeSettings::load(store, &ClarityConfig::default()).unwrap();
        assert_eq!(settings.summary_interval_seconds(), 45);
        assert_eq!(settings.language(), Language::Zh);
    }

    #[test]
    fn test_empty_model_rejected() {
        let db = Arc::new(Database::in_memory().unwrap());
        let settings = RuntimeSettings::load(repo(&db), &ClarityConfig::default()).unwrap();
        assert!(settings.set_model(" ").is_err());
        assert_eq!(settings.model(), "gemini-3-flash-preview");
    }
}
