use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;
use crate::models::{BelowCpAverage, EngineOptions, MatchConfig, Timestamp};

const CONFIG_VERSION: &str = "1.0";

/// Contents of `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "ConfigMetadata::fresh")]
    pub metadata: ConfigMetadata,

    /// Rider thresholds at session start
    pub athlete: AthleteSettings,

    /// Match detection thresholds
    #[serde(default)]
    pub matches: MatchConfig,

    /// Engine tuning and feature toggles
    #[serde(default)]
    pub engine: EngineOptions,

    #[serde(default)]
    pub logging: LogConfig,
}

/// File bookkeeping, refreshed on every save
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigMetadata {
    fn fresh() -> Self {
        let stamp = Utc::now();
        ConfigMetadata {
            version: CONFIG_VERSION.to_string(),
            created_at: stamp,
            updated_at: stamp,
        }
    }
}

/// Rider thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AthleteSettings {
    /// Critical power in watts
    pub critical_power: f64,

    /// Anaerobic work capacity in joules
    pub w_prime: f64,
}

impl Default for AthleteSettings {
    fn default() -> Self {
        AthleteSettings {
            critical_power: 250.0,
            w_prime: 20000.0,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            metadata: ConfigMetadata::fresh(),
            athlete: AthleteSettings::default(),
            matches: MatchConfig::default(),
            engine: EngineOptions::default(),
            logging: LogConfig::default(),
        }
    }
}

fn invalid(field: &str, value: f64) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn require_non_negative(field: &str, value: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, value))
    }
}

impl AppConfig {
    /// Parse and validate a config file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;

        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Write as TOML, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_content = toml::to_string_pretty(self).map_err(ConfigError::from)?;
        fs::write(&path, toml_content)?;

        info!(path = %path.as_ref().display(), "Configuration saved");
        Ok(())
    }

    /// `~/.wbalrs/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wbalrs")
            .join("config.toml")
    }

    /// The default file, or built-in defaults when it is absent or unreadable
    pub fn load_or_default() -> Self {
        let path = Self::default_config_path();
        if !path.exists() {
            return AppConfig::default();
        }

        Self::load_from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "Ignoring unreadable config file");
            AppConfig::default()
        })
    }

    /// Load from an explicit path, or the default location when none is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display())),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Reject values the engine cannot interpret.
    ///
    /// Low-but-valid CP and W' pass: the engine raises them to its floors.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        require_non_negative("athlete.critical_power", self.athlete.critical_power)?;
        require_non_negative("athlete.w_prime", self.athlete.w_prime)?;
        require_non_negative("matches.min_match_duration_secs", self.matches.min_match_duration_secs)?;
        require_non_negative("matches.min_depletion_percent", self.matches.min_depletion_percent)?;
        require_non_negative("matches.min_power_percent", self.matches.min_power_percent)?;

        if !(self.engine.update_step.is_finite() && self.engine.update_step > 0.0) {
            return Err(invalid("engine.update_step", self.engine.update_step));
        }
        if let BelowCpAverage::Trailing { window_secs } = self.engine.below_cp_average {
            if !(window_secs.is_finite() && window_secs > 0.0) {
                return Err(invalid("engine.below_cp_average.window_secs", window_secs));
            }
        }

        Ok(())
    }

    /// Build an engine from this configuration
    pub fn engine(&self, now: Timestamp) -> Engine {
        Engine::with_options(
            self.athlete.critical_power,
            self.athlete.w_prime,
            self.matches,
            self.engine,
            now,
        )
    }
}
