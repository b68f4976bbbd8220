//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! server base URL, renewal endpoint, logout signal key and signal directory.
//! The credential is never part of it.
//!
//! Configuration is stored at `~/.config/engauge-dashboard/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{Session, DEFAULT_LOGOUT_SIGNAL_KEY, DEFAULT_RENEWAL_ENDPOINT};
use crate::signal::FileStore;

/// Application name used for config/data directory paths
const APP_NAME: &str = "engauge-dashboard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Signal directory name under the local data directory
const SIGNAL_DIR: &str = "signals";

/// Server address used when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub renewal_endpoint: String,
    pub logout_signal_key: String,
    /// Directory shared by every process that should log out together
    pub signal_dir: Option<PathBuf>,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            renewal_endpoint: DEFAULT_RENEWAL_ENDPOINT.to_string(),
            logout_signal_key: DEFAULT_LOGOUT_SIGNAL_KEY.to_string(),
            signal_dir: None,
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn signal_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.signal_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find local data directory"))?;
        Ok(data_dir.join(APP_NAME).join(SIGNAL_DIR))
    }

    /// Build a session over the shared signal directory, with this config's
    /// renewal endpoint and logout key applied.
    pub fn session(&self) -> Result<Session> {
        let store = FileStore::open(self.signal_dir()?)?;
        let session = Session::new(&self.base_url, Arc::new(store))?;
        session.set_renewal_endpoint(&self.renewal_endpoint);
        session.set_logout_signal_key(&self.logout_signal_key);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.renewal_endpoint, "/refresh-token");
        assert_eq!(config.logout_signal_key, "ra-logout");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            base_url: "https://engauge.example.com".to_string(),
            last_username: Some("admin".to_string()),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"logout_signal_key":"my-logout"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.logout_signal_key, "my-logout");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_explicit_signal_dir_wins() {
        let config = Config {
            signal_dir: Some(PathBuf::from("/tmp/engauge-signals")),
            ..Config::default()
        };
        assert_eq!(config.signal_dir().unwrap(), PathBuf::from("/tmp/engauge-signals"));
    }

    #[tokio::test]
    async fn test_session_applies_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            base_url: "http://127.0.0.1:9/".to_string(),
            renewal_endpoint: "/auth/renew".to_string(),
            logout_signal_key: "my-logout".to_string(),
            signal_dir: Some(dir.path().join("signals")),
            last_username: None,
        };

        let session = config.session().unwrap();

        assert_eq!(session.base_url(), "http://127.0.0.1:9");
        assert_eq!(session.renewal_endpoint(), "/auth/renew");
        assert_eq!(session.logout_signal_key(), "my-logout");
        assert!(dir.path().join("signals").is_dir());
    }
}
