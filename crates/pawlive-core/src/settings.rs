use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "https://api.pawfectmatch.com/api";
pub const DEFAULT_SIGNALING_URL: &str = "https://api.pawfectmatch.com";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    #[serde(default = "default_true")]
    pub camera_enabled_on_start: bool,
    #[serde(default = "default_true")]
    pub mic_enabled_on_start: bool,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_signaling_url() -> String {
    DEFAULT_SIGNALING_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    15
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            signaling_url: default_signaling_url(),
            camera_enabled_on_start: true,
            mic_enabled_on_start: true,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl LiveSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Settings persisted as `settings.json` in the host's data directory.
pub struct SettingsStore {
    settings: Mutex<LiveSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> LiveSettings {
        self.lock().clone()
    }

    pub fn set_api_base_url(&self, url: String) {
        self.lock().api_base_url = url;
        self.save();
    }

    pub fn set_signaling_url(&self, url: String) {
        self.lock().signaling_url = url;
        self.save();
    }

    pub fn set_camera_enabled_on_start(&self, enabled: bool) {
        self.lock().camera_enabled_on_start = enabled;
        self.save();
    }

    pub fn set_mic_enabled_on_start(&self, enabled: bool) {
        self.lock().mic_enabled_on_start = enabled;
        self.save();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LiveSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to encode settings: {e}"),
        }
    }

    fn load(path: &Path) -> LiveSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable {}: {e}", path.display());
                LiveSettings::default()
            }),
            Err(_) => LiveSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = LiveSettings::default();
        assert_eq!(s.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(s.signaling_url, DEFAULT_SIGNALING_URL);
        assert!(s.camera_enabled_on_start);
        assert!(s.mic_enabled_on_start);
        assert_eq!(s.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), LiveSettings::default());
    }

    #[test]
    fn test_set_urls_persist() {
        let dir = temp_dir();
        {
            let store = SettingsStore::new(dir.path());
            store.set_api_base_url("http://localhost:5000/api".to_string());
            store.set_signaling_url("http://localhost:5000".to_string());
        }
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get().api_base_url, "http://localhost:5000/api");
        assert_eq!(store.get().signaling_url, "http://localhost:5000");
    }

    #[test]
    fn test_set_media_defaults_persist() {
        let dir = temp_dir();
        {
            let store = SettingsStore::new(dir.path());
            store.set_camera_enabled_on_start(false);
            store.set_mic_enabled_on_start(false);
        }
        let s = SettingsStore::new(dir.path()).get();
        assert!(!s.camera_enabled_on_start);
        assert!(!s.mic_enabled_on_start);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let dir = temp_dir();
        fs::write(dir.path().join("settings.json"), r#"{"request_timeout_secs": 5}"#).unwrap();
        let s = SettingsStore::new(dir.path()).get();
        assert_eq!(s.request_timeout_secs, 5);
        assert_eq!(s.api_base_url, DEFAULT_API_BASE_URL);
        assert!(s.mic_enabled_on_start);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("settings.json"), "not json {{{").unwrap();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), LiveSettings::default());
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let s = LiveSettings {
            request_timeout_secs: 0,
            ..LiveSettings::default()
        };
        assert_eq!(s.request_timeout(), Duration::from_secs(1));
    }
}
