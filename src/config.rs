//! Minimal runtime configuration helpers.
//! Everything comes from environment variables (optionally seeded by `.env`).

use crate::registry::RegistryError;
use http::Uri;
use std::path::PathBuf;

pub const DEFAULT_DATA_FILE: &str = "smart-home-data.json";
pub const DEFAULT_SUPERVISOR_WS_URL: &str = "ws://supervisor/core/websocket";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// JSON document holding every storage key.
    pub data_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_file = lookup("SMART_HOME_DATA_FILE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_FILE.to_string());
        Config {
            data_file: PathBuf::from(data_file),
        }
    }

    /// A command-line path beats the environment.
    pub fn with_data_file(mut self, data_file: Option<PathBuf>) -> Self {
        if let Some(path) = data_file {
            self.data_file = path;
        }
        self
    }
}

/// Connection settings for the device-registry updater.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub token: String,
    pub ws_url: Uri,
}

impl RegistryConfig {
    pub fn from_env() -> Result<Self, RegistryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RegistryError> {
        let token = lookup("SUPERVISOR_TOKEN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(RegistryError::MissingToken)?;

        let raw_url = lookup("SUPERVISOR_WS_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUPERVISOR_WS_URL.to_string());
        let ws_url: Uri = raw_url
            .parse()
            .map_err(|e| RegistryError::InvalidUrl(format!("SUPERVISOR_WS_URL {:?}: {}", raw_url, e)))?;
        match ws_url.scheme_str() {
            Some("ws") | Some("wss") if ws_url.host().is_some() => {}
            _ => {
                return Err(RegistryError::InvalidUrl(format!(
                    "SUPERVISOR_WS_URL must be a ws:// or wss:// URL, got {:?}",
                    raw_url
                )));
            }
        }

        Ok(RegistryConfig { token, ws_url })
    }
}
