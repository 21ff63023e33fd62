//! Engine settings, loaded from TOML. Every field has a default, so an empty
//! file (or no file) gives [`EngineConfig::default`].

use crate::diagnostics::CheckOptions;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Quiet period after the last keystroke before the text is parsed.
    pub debounce_ms: u64,
    pub style_warnings: bool,
    pub key_warnings: bool,
    /// File extension of stored profiles.
    pub profile_extension: String,
    /// Text for profiles that do not exist yet.
    pub default_template: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            debounce_ms: 500,
            style_warnings: false,
            key_warnings: true,
            profile_extension: "rhai".to_string(),
            default_template: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded engine config");
        Ok(config)
    }

    /// Like [`EngineConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.debounce_ms > 60_000 {
            return Err(ConfigError::Invalid(format!(
                "debounce_ms must be at most 60000, got {}",
                self.debounce_ms
            )));
        }
        let ext = &self.profile_extension;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Invalid(format!(
                "profile_extension must be alphanumeric, got {:?}",
                ext
            )));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn check_options(&self) -> CheckOptions {
        CheckOptions {
            key_warnings: self.key_warnings,
            style_warnings: self.style_warnings,
        }
    }
}
