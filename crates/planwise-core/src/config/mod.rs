//! Sync settings shared by every client.
//!
//! Settings live in `<config dir>/planwise/config.json`. Environment variables
//! override the file so scripts and CI can point a client at another backend
//! without touching it. Session tokens are never written to the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::queue::DEFAULT_MAX_ATTEMPTS;
use crate::sync::UnattendedResolution;
use crate::util::{is_http_url, normalize_text_option};

const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "planwise.db";

pub const ENV_API_URL: &str = "PLANWISE_API_URL";
pub const ENV_API_KEY: &str = "PLANWISE_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "PLANWISE_ACCESS_TOKEN";
pub const ENV_DB_PATH: &str = "PLANWISE_DB_PATH";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the hosted backend; unset means local-only
    pub api_url: Option<String>,
    /// Public (anon) API key sent with every request
    pub api_key: Option<String>,
    /// User session token, from the environment only
    #[serde(skip)]
    pub access_token: Option<String>,
    /// Local store location; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
    /// How often remote subscriptions poll for changes
    pub poll_interval_secs: u64,
    /// Background sync period while online; `None` syncs only on reconnect
    pub auto_sync_interval_secs: Option<u64>,
    /// Permanent replay failures before an operation is dead-lettered
    pub max_attempts: Option<u32>,
    pub unattended_resolution: UnattendedResolution,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            access_token: None,
            db_path: None,
            request_timeout_secs: 10,
            poll_interval_secs: 15,
            auto_sync_interval_secs: Some(300),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            unattended_resolution: UnattendedResolution::default(),
        }
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("db_path", &self.db_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("auto_sync_interval_secs", &self.auto_sync_interval_secs)
            .field("max_attempts", &self.max_attempts)
            .field("unattended_resolution", &self.unattended_resolution)
            .finish()
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("planwise").join(CONFIG_FILE_NAME))
}

pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("planwise").join(DB_FILE_NAME))
}

impl SyncSettings {
    /// Load the default config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match default_config_path() {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut settings = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        settings.normalize();
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Override fields from environment-style variables provided by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_url = Some(url);
        }
        if let Some(key) = normalize_text_option(lookup(ENV_API_KEY)) {
            self.api_key = Some(key);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_ACCESS_TOKEN)) {
            self.access_token = Some(token);
        }
        if let Some(path) = normalize_text_option(lookup(ENV_DB_PATH)) {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    fn normalize(&mut self) {
        self.api_url = normalize_text_option(self.api_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.api_key = normalize_text_option(self.api_key.take());
        self.access_token = normalize_text_option(self.access_token.take());
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_url {
            if !is_http_url(url) {
                return Err(Error::Config(format!(
                    "api_url must include http:// or https:// (got {url})"
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".into()));
        }
        if self.poll_interval_secs == 0 || self.auto_sync_interval_secs == Some(0) {
            return Err(Error::Config("sync intervals must be positive".into()));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::Config("max_attempts must be positive".into()));
        }
        Ok(())
    }

    /// Where the local store lives
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        self.db_path
            .clone()
            .or_else(default_db_path)
            .ok_or_else(|| Error::Config("Failed to resolve a data directory".into()))
    }

    pub fn is_remote_configured(&self) -> bool {
        self.api_url.is_some()
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.auto_sync_interval_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = SyncSettings::load_from_path(&tmp.path().join("config.json")).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.max_attempts, Some(5));
        assert_eq!(
            settings.unattended_resolution,
            UnattendedResolution::PreferRemote
        );
    }

    #[test]
    fn save_and_load_round_trip_without_token() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("planwise").join("config.json");
        let settings = SyncSettings {
            api_url: Some(" https://db.example.com/ ".into()),
            api_key: Some("anon".into()),
            access_token: Some("session".into()),
            unattended_resolution: UnattendedResolution::Skip,
            ..SyncSettings::default()
        };

        settings.save_to_path(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("session"));

        let loaded = SyncSettings::load_from_path(&path).unwrap();
        assert_eq!(loaded.api_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(loaded.access_token, None);
        assert_eq!(loaded.unattended_resolution, UnattendedResolution::Skip);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"auto_sync_interval_secs": null, "max_attempts": 3}"#).unwrap();

        let settings = SyncSettings::load_from_path(&path).unwrap();
        assert_eq!(settings.auto_sync_interval(), None);
        assert_eq!(settings.max_attempts, Some(3));
        assert_eq!(settings.request_timeout_secs, 10);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            SyncSettings::load_from_path(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, "https://override.example.com"),
            (ENV_ACCESS_TOKEN, "jwt"),
            (ENV_DB_PATH, "/tmp/planwise-test.db"),
            (ENV_API_KEY, "   "),
        ]
        .into_iter()
        .collect();
        let mut settings = SyncSettings {
            api_url: Some("https://file.example.com".into()),
            api_key: Some("file-key".into()),
            ..SyncSettings::default()
        };

        settings.apply_env(|key| env.get(key).map(|value| (*value).to_string()));

        assert_eq!(settings.api_url.as_deref(), Some("https://override.example.com"));
        assert_eq!(settings.api_key.as_deref(), Some("file-key"));
        assert_eq!(settings.access_token.as_deref(), Some("jwt"));
        assert_eq!(
            settings.resolved_db_path().unwrap(),
            PathBuf::from("/tmp/planwise-test.db")
        );
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad_url = SyncSettings {
            api_url: Some("db.example.com".into()),
            ..SyncSettings::default()
        };
        assert!(bad_url.validate().is_err());

        let zero_attempts = SyncSettings {
            max_attempts: Some(0),
            ..SyncSettings::default()
        };
        assert!(zero_attempts.validate().is_err());
        assert!(SyncSettings::default().validate().is_ok());
    }

    #[test]
    fn debug_redacts_secrets() {
        let settings = SyncSettings {
            api_key: Some("anon-secret".into()),
            access_token: Some("jwt-secret".into()),
            ..SyncSettings::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
