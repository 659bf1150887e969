//! Persisted configuration: entry data and the YAML entry store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_BASE_URL;
use crate::DOMAIN;

/// Default polling period in minutes.
pub const DEFAULT_UPDATE_INTERVAL: u32 = 15;
pub const MIN_UPDATE_INTERVAL: u32 = 1;
pub const MAX_UPDATE_INTERVAL: u32 = 60;

/// Env var overriding the API base URL.
pub const BASE_URL_ENV: &str = "MDT_RWIS_BASE_URL";

const STORE_FILENAME: &str = "entries.yaml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("update interval must be between 1 and 60 minutes, got {0}")]
    IntervalOutOfRange(i64),
    #[error("entry already configured: {0}")]
    AlreadyConfigured(String),
    #[error("cannot determine config directory")]
    NoConfigDir,
}

/// Polling period in whole minutes, always within 1..=60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UpdateInterval(u32);

impl UpdateInterval {
    pub fn new(minutes: i64) -> Result<Self, ConfigError> {
        if (MIN_UPDATE_INTERVAL as i64..=MAX_UPDATE_INTERVAL as i64).contains(&minutes) {
            Ok(Self(minutes as u32))
        } else {
            Err(ConfigError::IntervalOutOfRange(minutes))
        }
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.0) * 60)
    }
}

impl Default for UpdateInterval {
    fn default() -> Self {
        Self(DEFAULT_UPDATE_INTERVAL)
    }
}

impl TryFrom<i64> for UpdateInterval {
    type Error = ConfigError;

    fn try_from(minutes: i64) -> Result<Self, Self::Error> {
        Self::new(minutes)
    }
}

impl From<UpdateInterval> for i64 {
    fn from(interval: UpdateInterval) -> Self {
        i64::from(interval.0)
    }
}

/// Data persisted for one configured site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub api_key: String,
    pub site_id: String,
    #[serde(default)]
    pub update_interval: UpdateInterval,
}

/// A durable config entry as the host stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    pub data: EntryData,
}

fn default_domain() -> String {
    DOMAIN.to_string()
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>, unique_id: Option<String>, data: EntryData) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            domain: DOMAIN.to_string(),
            title: title.into(),
            unique_id,
            data,
        }
    }
}

/// YAML file holding every config entry of the standalone runner.
///
/// ```yaml
/// base_url: https://app.mdt.mt.gov/atms/api/conditions/v1   # optional
/// entries:
///   - entry_id: 3f2c...
///     title: Montana DOT RWIS - Bozeman Pass
///     unique_id: mdt_rwis_123
///     data:
///       api_key: ...
///       site_id: "123"
///       update_interval: 15
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub entries: Vec<ConfigEntry>,
}

impl EntryStore {
    /// `~/.config/mdt-rwis/entries.yaml` (platform equivalent elsewhere).
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(env!("CARGO_PKG_NAME")).join(STORE_FILENAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load the store from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Load the store, or start empty if the file doesn't exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Entry store not found, starting empty: {}", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Parse the store from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Write the store with 0600 permissions; it holds API keys.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let io_err = |e: std::io::Error| ConfigError::IoError(format!("{}: {}", path.display(), e));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .map_err(io_err)?;
            file.write_all(yaml.as_bytes()).map_err(io_err)?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(path, yaml).map_err(io_err)?;
        }

        Ok(())
    }

    /// API root: env override, then the store's `base_url`, then production.
    pub fn base_url(&self) -> String {
        std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn entries_for_domain<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a ConfigEntry> {
        self.entries.iter().filter(move |e| e.domain == domain)
    }

    pub fn has_unique_id(&self, unique_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.unique_id.as_deref() == Some(unique_id))
    }

    /// Append an entry, rejecting a second entry with the same unique id.
    pub fn add(&mut self, entry: ConfigEntry) -> Result<(), ConfigError> {
        if let Some(unique_id) = entry.unique_id.as_deref() {
            if self.has_unique_id(unique_id) {
                return Err(ConfigError::AlreadyConfigured(unique_id.to_string()));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn remove(&mut self, entry_id: &str) -> Option<ConfigEntry> {
        let index = self.entries.iter().position(|e| e.entry_id == entry_id)?;
        Some(self.entries.remove(index))
    }
}
