use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Key under which the backend address is persisted.
pub const ENDPOINT_KEY: &str = "gcs_ws_url";

/// String key-value storage that outlives the process.
pub trait SettingsStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Settings kept as a flat JSON object in one file.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {:?}", self.path))?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw)
            .with_context(|| format!("Settings file {:?} is not JSON", self.path))?
        {
            Value::Object(map) => Ok(map),
            _ => Err(anyhow!("Settings file {:?} is not a JSON object", self.path)),
        }
    }
}

impl SettingsStore for FileSettings {
    fn load(&self, key: &str) -> Option<String> {
        match self.read_all() {
            Ok(map) => map.get(key).and_then(Value::as_str).map(str::to_string),
            Err(e) => {
                warn!("Ignoring unreadable settings: {:#}", e);
                None
            }
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_all().unwrap_or_else(|e| {
            warn!("Rewriting unreadable settings: {:#}", e);
            Map::new()
        });
        map.insert(key.to_string(), Value::String(value.to_string()));

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create settings directory {:?}", dir))?;
        }
        let body = serde_json::to_string_pretty(&Value::Object(map))?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("Failed to write settings to {:?}", self.path))?;
        debug!("Saved setting {} to {:?}", key, self.path);
        Ok(())
    }
}

/// In-process settings, for embedding without a writable config directory.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl SettingsStore for MemorySettings {
    fn load(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|e| anyhow!("Lock error: {}", e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_survives_a_restart() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("settings.json");

        let first = FileSettings::new(&path);
        assert_eq!(first.load(ENDPOINT_KEY), None);
        first.save(ENDPOINT_KEY, "ws://10.0.0.5:8765")?;

        let restarted = FileSettings::new(&path);
        assert_eq!(
            restarted.load(ENDPOINT_KEY).as_deref(),
            Some("ws://10.0.0.5:8765")
        );
        Ok(())
    }

    #[test]
    fn saving_keeps_other_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = FileSettings::new(dir.path().join("settings.json"));
        settings.save("theme", "dark")?;
        settings.save(ENDPOINT_KEY, "ws://a:1")?;
        assert_eq!(settings.load("theme").as_deref(), Some("dark"));
        Ok(())
    }

    #[test]
    fn corrupt_file_reads_as_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{oops")?;
        let settings = FileSettings::new(&path);
        assert_eq!(settings.load(ENDPOINT_KEY), None);
        settings.save(ENDPOINT_KEY, "ws://b:2")?;
        assert_eq!(settings.load(ENDPOINT_KEY).as_deref(), Some("ws://b:2"));
        Ok(())
    }
}
