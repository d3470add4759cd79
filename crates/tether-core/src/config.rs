use crate::client::IceServer;
use crate::PRODUCT_NAME;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Tunables for a connection attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Ceiling for a whole attempt, from `connect` to the server descriptor.
    pub timeout_ms: u64,
    pub ice_candidate_pool_size: u8,
    pub data_channel_label: String,
    /// Used when signaling does not hand out ICE servers.
    pub fallback_ice_servers: Vec<IceServer>,
    pub product_name: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            ice_candidate_pool_size: 10,
            data_channel_label: "tether".to_string(),
            fallback_ice_servers: default_ice_servers(),
            product_name: PRODUCT_NAME.to_string(),
        }
    }
}

fn default_ice_servers() -> Vec<IceServer> {
    [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
        "stun:stun.cloudflare.com:3478",
    ]
    .into_iter()
    .map(IceServer::stun)
    .collect()
}

impl ConnectConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load from `path`, using defaults for a missing or unreadable file.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            log::info!("Config file not found at {}, using defaults", path.display());
            return Self::default();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::error!("Failed to read config file {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<ConnectConfig>(&content) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                log::warn!(
                    "Failed to parse config file {}: {}, using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    fn sanitized(mut self) -> Self {
        if self.timeout_ms == 0 {
            log::warn!("timeout_ms must be positive, using default");
            self.timeout_ms = Self::default().timeout_ms;
        }
        if self.data_channel_label.is_empty() {
            self.data_channel_label = Self::default().data_channel_label;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.ice_candidate_pool_size, 10);
        assert!(!config.fallback_ice_servers.is_empty());
        assert!(config.fallback_ice_servers[0].urls[0].starts_with("stun:"));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectConfig::load(&dir.path().join("config.json"));
        assert_eq!(config.timeout_ms, 30_000);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"timeout_ms": 5000, "fallback_ice_servers": []}"#).unwrap();

        let config = ConnectConfig::load(&path);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(config.fallback_ice_servers.is_empty());
        assert_eq!(config.product_name, PRODUCT_NAME);
    }

    #[test]
    fn load_malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{{{").unwrap();
        assert_eq!(ConnectConfig::load(&path).timeout_ms, 30_000);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"timeout_ms": 0}"#).unwrap();
        assert_eq!(ConnectConfig::load(&path).timeout_ms, 30_000);
    }
}
