use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub buttons: ButtonsConfig,
    pub debounce: Option<DebounceConfig>,
    pub scan: Option<ScanConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ButtonsConfig {
    /// Beacon UUIDs whose sightings are tracked; everything else is dropped.
    #[serde(default)]
    pub uuids: Vec<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DebounceConfig {
    pub large_rssi_delta: Option<u16>,
    pub small_rssi_delta: Option<u16>,
    pub drift_report_interval_seconds: Option<u64>,
    pub watchdog_interval_seconds: Option<u64>,
    pub max_silent_interval_seconds: Option<u64>,
    pub tick_interval_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub enabled: Option<bool>,
    pub adapter_index: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Validated tunables for the debounce engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub large_rssi_delta: u16,
    pub small_rssi_delta: u16,
    pub drift_report_interval: Duration,
    pub watchdog_interval: Duration,
    pub max_silent_interval: Duration,
    pub tick_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            large_rssi_delta: 10,
            small_rssi_delta: 3,
            drift_report_interval: Duration::from_secs(900),
            watchdog_interval: Duration::from_secs(70),
            max_silent_interval: Duration::from_secs(1800),
            tick_interval: Duration::from_secs(10),
        }
    }
}

/// Everything the engine needs from the config file, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub accepted_ids: HashSet<Uuid>,
    pub settings: EngineSettings,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate, so a config that loads is also usable by the engine.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::de::from_str(contents)?;
        config.engine_config()?;
        Ok(config)
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let accepted_ids = self
            .buttons
            .uuids
            .iter()
            .map(|u| {
                Uuid::parse_str(u)
                    .map_err(|e| ConfigError::Invalid(format!("beacon uuid {u:?}: {e}")))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let debounce = self.debounce.clone().unwrap_or_default();
        let defaults = EngineSettings::default();
        let seconds = |value: Option<u64>, default: Duration, name: &str| match value {
            Some(0) => Err(ConfigError::Invalid(format!("{name} must be greater than zero"))),
            Some(secs) => Ok(Duration::from_secs(secs)),
            None => Ok(default),
        };

        let settings = EngineSettings {
            large_rssi_delta: debounce.large_rssi_delta.unwrap_or(defaults.large_rssi_delta),
            small_rssi_delta: debounce.small_rssi_delta.unwrap_or(defaults.small_rssi_delta),
            drift_report_interval: seconds(
                debounce.drift_report_interval_seconds,
                defaults.drift_report_interval,
                "drift_report_interval_seconds",
            )?,
            watchdog_interval: seconds(
                debounce.watchdog_interval_seconds,
                defaults.watchdog_interval,
                "watchdog_interval_seconds",
            )?,
            max_silent_interval: seconds(
                debounce.max_silent_interval_seconds,
                defaults.max_silent_interval,
                "max_silent_interval_seconds",
            )?,
            tick_interval: seconds(
                debounce.tick_interval_seconds,
                defaults.tick_interval,
                "tick_interval_seconds",
            )?,
        };

        if settings.small_rssi_delta > settings.large_rssi_delta {
            return Err(ConfigError::Invalid(format!(
                "small_rssi_delta ({}) exceeds large_rssi_delta ({})",
                settings.small_rssi_delta, settings.large_rssi_delta
            )));
        }

        Ok(EngineConfig {
            accepted_ids,
            settings,
        })
    }

    pub fn scan_enabled(&self) -> bool {
        self.scan
            .as_ref()
            .and_then(|s| s.enabled)
            .unwrap_or(true)
    }

    pub fn adapter_index(&self) -> usize {
        self.scan
            .as_ref()
            .and_then(|s| s.adapter_index)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [mqtt]
            host = "localhost"
            port = 1883
            username = "user"
            password = "pass"

            [buttons]
            uuids = ["e2c56db5-dffb-48d2-b060-d0f5a71096e0"]

            [debounce]
            large_rssi_delta = 12
            watchdog_interval_seconds = 60

            [scan]
            enabled = false
        "#;
        let config = AppConfig::parse(config_str).unwrap();
        assert!(config.mqtt.host == "localhost");
        assert!(!config.scan_enabled());

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.accepted_ids.len(), 1);
        assert_eq!(engine.settings.large_rssi_delta, 12);
        assert_eq!(engine.settings.small_rssi_delta, 3);
        assert_eq!(engine.settings.watchdog_interval, Duration::from_secs(60));
        assert_eq!(engine.settings.max_silent_interval, Duration::from_secs(1800));
    }

    #[test]
    fn test_defaults_without_optional_sections() {
        let config_str = r#"
            [mqtt]
            host = "broker"

            [buttons]
        "#;
        let config = AppConfig::parse(config_str).unwrap();
        assert!(config.scan_enabled());
        assert_eq!(config.adapter_index(), 0);

        let engine = config.engine_config().unwrap();
        assert!(engine.accepted_ids.is_empty());
        assert_eq!(engine.settings, EngineSettings::default());
    }

    #[test]
    fn test_bad_uuid_is_invalid() {
        let config_str = r#"
            [mqtt]
            host = "broker"

            [buttons]
            uuids = ["definitely-not-a-uuid"]
        "#;
        assert!(matches!(
            AppConfig::parse(config_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_inverted_deltas_are_invalid() {
        let config_str = r#"
            [mqtt]
            host = "broker"

            [buttons]

            [debounce]
            large_rssi_delta = 2
            small_rssi_delta = 5
        "#;
        assert!(matches!(
            AppConfig::parse(config_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let config_str = r#"
            [mqtt]
            host = "broker"

            [buttons]

            [debounce]
            tick_interval_seconds = 0
        "#;
        assert!(matches!(
            AppConfig::parse(config_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_boolean_strings_are_rejected() {
        let config_str = r#"
            [mqtt]
            host = "broker"

            [buttons]

            [scan]
            enabled = "true"
        "#;
        assert!(matches!(
            AppConfig::parse(config_str),
            Err(ConfigError::Parse(_))
        ));
    }
}
