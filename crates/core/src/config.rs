//! TOML-based configuration for the stall engine.
//!
//! Every section is optional; missing values fall back to their defaults.
//! The log level may be overridden at runtime through the
//! `STALLSYNC_LOG_LEVEL` environment variable, see
//! [`EngineConfig::apply_env_overrides`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::stall::{DuplicateSurvivor, PlanParams};

/// Environment variable that overrides `[logging] level`.
pub const LOG_LEVEL_ENV: &str = "STALLSYNC_LOG_LEVEL";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Capacity of the issue event broadcast channel (default 256). Slow
    /// subscribers lag once this many events are buffered.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Which duplicate survives `remove_duplicated`: `oldest` or `newest`.
    #[serde(default)]
    pub duplicate_survivor: DuplicateSurvivor,

    /// Largest numeric rename suffix tried (default 9999).
    #[serde(default = "default_max_rename_suffix")]
    pub max_rename_suffix: u32,
}

fn default_max_rename_suffix() -> u32 {
    9999
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            duplicate_survivor: DuplicateSurvivor::default(),
            max_rename_suffix: default_max_rename_suffix(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        match std::env::var(LOG_LEVEL_ENV) {
            Ok(level) if !level.trim().is_empty() => {
                debug!(env_name = LOG_LEVEL_ENV, %level, "log level overridden from environment");
                self.logging.level = level.trim().to_lowercase();
            }
            Ok(_) => warn!(env_name = LOG_LEVEL_ENV, "env var is set but empty"),
            Err(_) => {}
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!("must be one of {}", LOG_LEVELS.join(", ")),
            });
        }
        if self.registry.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "registry.event_capacity".into(),
                detail: "event capacity must be > 0".into(),
            });
        }
        if self.resolution.max_rename_suffix == 0 {
            return Err(ConfigError::InvalidValue {
                field: "resolution.max_rename_suffix".into(),
                detail: "rename suffix limit must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, apply overrides, and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Planner parameters derived from `[resolution]`.
    pub fn plan_params(&self) -> PlanParams {
        PlanParams {
            survivor: self.resolution.duplicate_survivor,
            max_rename_suffix: self.resolution.max_rename_suffix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[logging]
level = "debug"

[registry]
event_capacity = 64

[resolution]
duplicate_survivor = "newest"
max_rename_suffix = 50
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: EngineConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.registry.event_capacity, 64);
        assert_eq!(config.resolution.duplicate_survivor, DuplicateSurvivor::Newest);
        assert_eq!(config.plan_params().max_rename_suffix, 50);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stallsync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = EngineConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.plan_params().survivor, DuplicateSurvivor::Newest);
    }

    #[test]
    fn test_file_not_found() {
        let result = EngineConfig::load_from_file("/nonexistent/stallsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[resolution]\nduplicate_survivor = \"middle\"\n").unwrap();
        let result = EngineConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "logging.level"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = EngineConfig::default();
        config.registry.event_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "registry.event_capacity"
        ));
    }

    #[test]
    fn test_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.registry.event_capacity, 256);
        assert_eq!(config.resolution.duplicate_survivor, DuplicateSurvivor::Oldest);
        assert_eq!(config.resolution.max_rename_suffix, 9999);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var(LOG_LEVEL_ENV, " WARN ");
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        std::env::remove_var(LOG_LEVEL_ENV);

        assert_eq!(config.logging.level, "warn");
    }
}
