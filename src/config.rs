//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Environment variable overriding the reaction window, in milliseconds.
pub const ENV_REACTION_WINDOW_MS: &str = "SCENE_ENGINE_REACTION_WINDOW_MS";
/// Environment variable naming the durable log file.
pub const ENV_LOG_PATH: &str = "SCENE_ENGINE_LOG_PATH";
/// Environment variable overriding the update channel capacity.
pub const ENV_UPDATE_CAPACITY: &str = "SCENE_ENGINE_UPDATE_CAPACITY";

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a reaction window stays open.
    pub reaction_window: Duration,
    /// Entries per scene after which a warning is logged.
    pub max_log_entries_per_scene: u64,
    /// Buffered scene updates per subscriber.
    pub update_channel_capacity: usize,
    /// Durable log location; in-memory when unset.
    pub log_path: Option<PathBuf>,
    /// Client seed prefix used when a roll request names none.
    pub default_client_seed: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reaction_window: Duration::from_secs(6),
            max_log_entries_per_scene: 10_000,
            update_channel_capacity: 64,
            log_path: None,
            default_client_seed: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable held something unparseable.
    #[error("invalid value {value:?} for {var}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// A value parsed but is out of range.
    #[error("{var} must be greater than zero")]
    Zero {
        /// Variable name.
        var: &'static str,
    },
}

impl EngineConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|var| std::env::var(var).ok())
    }

    /// Overlay values from `lookup` onto `self`.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(ms) = lookup(ENV_REACTION_WINDOW_MS) {
            let ms = parse_positive(ENV_REACTION_WINDOW_MS, &ms)?;
            self.reaction_window = Duration::from_millis(ms);
        }
        if let Some(path) = lookup(ENV_LOG_PATH).filter(|p| !p.trim().is_empty()) {
            self.log_path = Some(PathBuf::from(path));
        }
        if let Some(cap) = lookup(ENV_UPDATE_CAPACITY) {
            let cap = parse_positive(ENV_UPDATE_CAPACITY, &cap)?;
            self.update_channel_capacity =
                usize::try_from(cap).map_err(|_| ConfigError::InvalidValue {
                    var: ENV_UPDATE_CAPACITY,
                    value: cap.to_string(),
                })?;
        }
        Ok(self)
    }

    /// Reaction window as a calendar duration.
    pub fn reaction_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.reaction_window.as_millis()).unwrap_or(i64::MAX))
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_owned(),
    })?;
    if value == 0 {
        return Err(ConfigError::Zero { var });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: BTreeMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reaction_window, Duration::from_secs(6));
        assert_eq!(config.update_channel_capacity, 64);
        assert_eq!(config.reaction_window_chrono(), chrono::Duration::seconds(6));
    }

    #[test]
    fn test_overlay() {
        let config = EngineConfig::default()
            .overlay(env(&[
                (ENV_REACTION_WINDOW_MS, "1500"),
                (ENV_LOG_PATH, "/tmp/scene.jsonl"),
                (ENV_UPDATE_CAPACITY, "8"),
            ]))
            .unwrap();
        assert_eq!(config.reaction_window, Duration::from_millis(1500));
        assert_eq!(config.log_path, Some(PathBuf::from("/tmp/scene.jsonl")));
        assert_eq!(config.update_channel_capacity, 8);
    }

    #[test]
    fn test_overlay_rejects_bad_values() {
        let err = EngineConfig::default()
            .overlay(env(&[(ENV_REACTION_WINDOW_MS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = EngineConfig::default()
            .overlay(env(&[(ENV_UPDATE_CAPACITY, "0")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero {
            var: ENV_UPDATE_CAPACITY
        });
    }
}
