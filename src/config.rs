use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config::{Environment, File};
use once_cell::sync::Lazy;
use serde::Deserialize;

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub link: LinkConfig,
    pub mission: MissionConfig,
    pub event_log: EventLogConfig,
    pub triggers: TriggerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub default_endpoint: String,
    pub reconnect_interval_ms: u64,
    pub endpoint_change_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub settings_path: Option<String>,
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_endpoint: "ws://localhost:8765".to_string(),
            reconnect_interval_ms: 3000,
            endpoint_change_delay_ms: 500,
            connect_timeout_ms: 5000,
            settings_path: None,
            event_capacity: 256,
        }
    }
}

impl LinkConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn endpoint_change_delay(&self) -> Duration {
        Duration::from_millis(self.endpoint_change_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Explicit `settings_path`, else `<config_dir>/gcs-link/settings.json`.
    pub fn settings_file(&self) -> Option<PathBuf> {
        match &self.settings_path {
            Some(path) => Some(PathBuf::from(path)),
            None => dirs::config_dir().map(|dir| dir.join("gcs-link").join("settings.json")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub default_speed: f64,
    pub default_loiter: f64,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            default_speed: 2.0,
            default_loiter: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub redraw_pulse_ms: u64,
    pub pulse_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            redraw_pulse_ms: 50,
            pulse_ms: 100,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let env = std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let config_path = format!("config/{}.toml", env);
        let fallback_path = format!("/etc/gcs-link/{}.toml", env);

        let config_builder = config::Config::builder();
        let config_builder = if std::path::Path::new(&config_path).exists() {
            config_builder.add_source(File::with_name(&config_path))
        } else {
            config_builder.add_source(File::with_name(&fallback_path).required(false))
        };

        let settings = config_builder
            .add_source(Environment::with_prefix("GCS").separator("__"))
            .build()?;
        let config = settings.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.link.default_endpoint, "ws://localhost:8765");
        assert_eq!(config.link.reconnect_interval(), Duration::from_secs(3));
        assert_eq!(config.link.endpoint_change_delay(), Duration::from_millis(500));
        assert_eq!(config.event_log.capacity, 50);
        assert_eq!(config.mission.default_speed, 2.0);
    }

    #[test]
    fn explicit_settings_path_wins() {
        let link = LinkConfig {
            settings_path: Some("/tmp/gcs/settings.json".to_string()),
            ..LinkConfig::default()
        };
        assert_eq!(
            link.settings_file(),
            Some(PathBuf::from("/tmp/gcs/settings.json"))
        );
    }
}
