// Placestore Settings Engine
// Loads, saves, edits and resets the store configuration. The configuration is a JSON
// file; a missing file means defaults.

use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::types::errors::SettingsError;
use crate::types::settings::PlacesConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PLACESTORE_CONFIG";

/// File used when neither an override nor the environment names one.
pub const DEFAULT_CONFIG_FILE: &str = "placestore.json";

/// Trait defining the settings engine interface.
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<PlacesConfig, SettingsError>;
    fn save(&self) -> Result<(), SettingsError>;
    fn get_settings(&self) -> &PlacesConfig;
    fn set_value(&mut self, key: &str, value: Value) -> Result<(), SettingsError>;
    fn reset(&mut self) -> Result<(), SettingsError>;
    fn get_config_path(&self) -> &str;
}

/// Settings engine persisting `PlacesConfig` as pretty-printed JSON.
pub struct SettingsEngine {
    config_path: String,
    settings: PlacesConfig,
}

impl SettingsEngine {
    /// Uses `path_override` when given, else `placestore.json` in the
    /// working directory.
    pub fn new(path_override: Option<String>) -> Self {
        Self {
            config_path: path_override.unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string()),
            settings: PlacesConfig::default(),
        }
    }

    /// Like `new`, with the path taken from `PLACESTORE_CONFIG` if set.
    pub fn from_env() -> Self {
        Self::new(std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()))
    }
}

/// Walks the dot-separated `parts` into `root` and replaces the existing
/// leaf. Unknown keys are rejected rather than created.
fn set_path(root: &mut Value, key: &str, value: Value) -> Result<(), SettingsError> {
    let parts: Vec<&str> = key.split('.').collect();
    let Some((leaf, path)) = parts.split_last() else {
        return Err(SettingsError::InvalidKey("Key cannot be empty".to_string()));
    };

    let mut current = root;
    for part in path {
        current = current
            .get_mut(*part)
            .ok_or_else(|| SettingsError::InvalidKey(format!("Key '{}' not found in settings", key)))?;
    }
    match current {
        Value::Object(map) if map.contains_key(*leaf) => {
            map.insert(leaf.to_string(), value);
            Ok(())
        }
        Value::Object(_) => Err(SettingsError::InvalidKey(format!("Key '{}' not found in settings", key))),
        _ => Err(SettingsError::InvalidKey(format!(
            "Cannot navigate to key '{}': intermediate value is not an object",
            key
        ))),
    }
}

impl SettingsEngineTrait for SettingsEngine {
    /// Reads the config file. A missing file yields defaults; a malformed one
    /// is an error.
    fn load(&mut self) -> Result<PlacesConfig, SettingsError> {
        let path = Path::new(&self.config_path);
        if !path.exists() {
            log::debug!("no config at {}, using defaults", self.config_path);
            self.settings = PlacesConfig::default();
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(format!("Failed to read config file: {}", e)))?;
        self.settings = serde_json::from_str(&content)
            .map_err(|e| SettingsError::SerializationError(format!("Failed to parse config file: {}", e)))?;
        Ok(self.settings.clone())
    }

    fn save(&self) -> Result<(), SettingsError> {
        let path = Path::new(&self.config_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| SettingsError::IoError(format!("Failed to create config directory: {}", e)))?;
        }
        let json = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| SettingsError::SerializationError(format!("Failed to serialize settings: {}", e)))?;
        fs::write(path, json)
            .map_err(|e| SettingsError::IoError(format!("Failed to write config file: {}", e)))
    }

    fn get_settings(&self) -> &PlacesConfig {
        &self.settings
    }

    /// Updates one setting by key path (e.g. `"busy_timeout_ms"`), checks the
    /// result still deserializes, then saves.
    fn set_value(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        if key.is_empty() {
            return Err(SettingsError::InvalidKey("Key cannot be empty".to_string()));
        }
        let mut json = serde_json::to_value(&self.settings)
            .map_err(|e| SettingsError::SerializationError(format!("Failed to serialize settings: {}", e)))?;
        set_path(&mut json, key, value)?;

        self.settings = serde_json::from_value(json)
            .map_err(|e| SettingsError::InvalidValue(format!("Invalid value for key '{}': {}", key, e)))?;
        self.save()
    }

    fn reset(&mut self) -> Result<(), SettingsError> {
        self.settings = PlacesConfig::default();
        self.save()
    }

    fn get_config_path(&self) -> &str {
        &self.config_path
    }
}
