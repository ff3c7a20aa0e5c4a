// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent configuration.
//!
//! Resolution order, later wins:
//!
//! 1. Built-in defaults
//! 2. JSON file (`--config <path>`, else `~/.stagehand/config.json` if present)
//! 3. Environment: `QBIT_URL`, `QBIT_USER`, `QBIT_PASS`, `JACKETT_URL`,
//!    `JACKETT_API_KEY`, `STAGING_DIR`, `BIND_ADDRESS`, `PORT`
//!
//! Errors here are fatal at startup and never occur at cycle time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::placement::DEFAULT_POLL_INTERVAL_SECS;
use crate::session::{SessionConfig, DEFAULT_LOGIN_COOLDOWN_SECS};
use crate::types::Volume;
use crate::utils::mask_sensitive;

/// Directory under the home directory holding the config file.
const CONFIG_DIR_NAME: &str = ".stagehand";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),

    #[error("no managed volumes configured")]
    NoVolumes,

    #[error("volume at {} has an empty label", .0.display())]
    EmptyLabel(PathBuf),

    #[error("volume label {0:?} is used more than once")]
    DuplicateLabel(String),

    #[error("{field} is not a valid http(s) URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("environment variable {name} has an invalid value: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Complete agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// qBittorrent Web UI base URL.
    pub qbit_url: String,
    pub qbit_user: String,
    pub qbit_pass: String,
    /// Jackett base URL.
    pub jackett_url: String,
    pub jackett_api_key: String,
    /// Where new downloads land before placement.
    pub staging_dir: PathBuf,
    /// Managed volumes, in tie-break order.
    pub volumes: Vec<Volume>,
    pub poll_interval_secs: u64,
    pub login_cooldown_secs: u64,
    pub bind_address: String,
    pub port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            qbit_url: "http://qbittorrent:8080".to_string(),
            qbit_user: String::new(),
            qbit_pass: String::new(),
            jackett_url: "http://jackett:9117".to_string(),
            jackett_api_key: String::new(),
            staging_dir: PathBuf::from("/downloads"),
            volumes: vec![
                Volume::new("/media/A", "A-Drive", "A"),
                Volume::new("/media/B", "B-Drive", "B"),
                Volume::new("/media/E", "E-Drive", "E"),
            ],
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            login_cooldown_secs: DEFAULT_LOGIN_COOLDOWN_SECS,
            bind_address: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

/// Default config file location: `~/.stagehand/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl AgentConfig {
    /// Load from file and process environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("QBIT_URL") {
            self.qbit_url = value;
        }
        if let Some(value) = lookup("QBIT_USER") {
            self.qbit_user = value;
        }
        if let Some(value) = lookup("QBIT_PASS") {
            self.qbit_pass = value;
        }
        if let Some(value) = lookup("JACKETT_URL") {
            self.jackett_url = value;
        }
        if let Some(value) = lookup("JACKETT_API_KEY") {
            self.jackett_api_key = value;
        }
        if let Some(value) = lookup("STAGING_DIR") {
            self.staging_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("BIND_ADDRESS") {
            self.bind_address = value;
        }
        if let Some(value) = lookup("PORT") {
            self.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: "PORT", value })?;
        }
        Ok(())
    }

    /// Check everything the agent needs before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qbit_user.trim().is_empty() {
            return Err(ConfigError::MissingCredential("QBIT_USER"));
        }
        if self.qbit_pass.is_empty() {
            return Err(ConfigError::MissingCredential("QBIT_PASS"));
        }

        validate_url("qbit_url", &self.qbit_url)?;
        validate_url("jackett_url", &self.jackett_url)?;

        if self.volumes.is_empty() {
            return Err(ConfigError::NoVolumes);
        }
        let mut labels = HashSet::new();
        for volume in &self.volumes {
            if volume.label.trim().is_empty() {
                return Err(ConfigError::EmptyLabel(volume.path.clone()));
            }
            if !labels.insert(volume.label.as_str()) {
                return Err(ConfigError::DuplicateLabel(volume.label.clone()));
            }
        }

        if self.jackett_api_key.is_empty() {
            tracing::warn!("JACKETT_API_KEY is not set, search requests will be rejected upstream");
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::with_cooldown(Duration::from_secs(self.login_cooldown_secs))
    }

    /// `address:port` for the HTTP listener.
    /// Log the effective configuration with secrets masked.
    pub fn log_summary(&self) {
        tracing::info!(
            qbit_url = %self.qbit_url,
            qbit_user = %self.qbit_user,
            qbit_pass = %mask_sensitive(&self.qbit_pass, 0),
            jackett_url = %self.jackett_url,
            jackett_api_key = %mask_sensitive(&self.jackett_api_key, 4),
            staging = %self.staging_dir.display(),
            volumes = self.volumes.len(),
            poll_interval_secs = self.poll_interval_secs,
            "configuration loaded"
        );
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}
