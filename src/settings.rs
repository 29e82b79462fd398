//! Settings management for immersive-filters
//!
//! Engine settings are stored as XML, either at an explicit path or in
//! `<config_dir>/ImmersiveFilters/settings.xml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{EngineConfig, DEFAULT_STORE_KEY};

pub const MIN_FPS: u32 = 24;
pub const MAX_FPS: u32 = 240;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
    #[error("Could not find config directory")]
    NoConfigDir,
}

/// Runtime settings for the filter engine and frame clock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ImmersiveFilters")]
pub struct EngineSettings {
    /// Frame clock rate (24-240)
    #[serde(rename = "targetFps", default = "default_target_fps")]
    pub target_fps: u32,

    /// Force-remove a stopping effect after this many milliseconds (0 = wait forever)
    #[serde(rename = "teardownTimeoutMs", default)]
    pub teardown_timeout_ms: u64,

    /// Config store key holding the desired state
    #[serde(rename = "storeKey", default = "default_store_key")]
    pub store_key: String,

    /// Log filter used when no environment override is set
    #[serde(rename = "logLevel", default = "default_log_level")]
    pub log_level: String,
}

fn default_target_fps() -> u32 {
    60
}

fn default_store_key() -> String {
    DEFAULT_STORE_KEY.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            teardown_timeout_ms: 0,
            store_key: default_store_key(),
            log_level: default_log_level(),
        }
    }
}

impl EngineSettings {
    /// Clamp FPS to valid range (24-240)
    pub fn clamp_fps(&mut self) {
        self.target_fps = self.target_fps.clamp(MIN_FPS, MAX_FPS);
    }

    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("ImmersiveFilters");
            p.push("settings.xml");
            p
        })
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        let mut settings: Self = from_str(&contents)?;
        settings.clamp_fps();
        if settings.store_key.trim().is_empty() {
            settings.store_key = default_store_key();
        }
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let xml = to_string(self)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted)?;
        Ok(())
    }

    /// Load from the config directory, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring unreadable settings file: {}", e);
                Self::default()
            }
        }
    }

    /// Save to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::default_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to_file(&path)
    }

    pub fn teardown_timeout(&self) -> Option<Duration> {
        (self.teardown_timeout_ms > 0).then(|| Duration::from_millis(self.teardown_timeout_ms))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            store_key: self.store_key.clone(),
            teardown_timeout: self.teardown_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.target_fps, 60);
        assert_eq!(settings.teardown_timeout(), None);
        assert_eq!(settings.engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.xml");
        let settings = EngineSettings {
            target_fps: 120,
            teardown_timeout_ms: 1500,
            store_key: "weather".to_string(),
            log_level: "debug".to_string(),
        };
        settings.save_to_file(&path).unwrap();

        let loaded = EngineSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
        let config = loaded.engine_config();
        assert_eq!(config.store_key, "weather");
        assert_eq!(config.teardown_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_fps_is_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.xml");
        fs::write(&path, "<ImmersiveFilters><targetFps>1000</targetFps></ImmersiveFilters>").unwrap();

        let loaded = EngineSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.target_fps, MAX_FPS);
        assert_eq!(loaded.store_key, DEFAULT_STORE_KEY);
        assert_eq!(loaded.teardown_timeout_ms, 0);
    }

    #[test]
    fn test_invalid_xml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.xml");
        fs::write(&path, "<ImmersiveFilters><targetFps>fast</targetFps></ImmersiveFilters>").unwrap();
        assert!(matches!(
            EngineSettings::load_from_file(&path),
            Err(SettingsError::XmlParse(_))
        ));
    }
}
