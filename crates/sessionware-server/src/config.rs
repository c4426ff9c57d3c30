//! Server configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sessionware_core::SessionConfig;
use std::path::{Path, PathBuf};

/// Listen address when none is configured
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

/// Server configuration
///
/// ```toml
/// listen = "127.0.0.1:3000"
///
/// [session]
/// key = "session"
/// keys = ["..."]
///
/// [session.store]
/// backend = "sqlite"
/// path = "/var/lib/sessionware/sessions.db"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on
    pub listen: String,
    /// Session middleware settings
    pub session: SessionConfig,
    /// Where the configuration was read from
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            session: SessionConfig::default(),
            config_path: Self::default_path(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `~/.sessionware/config.toml`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            toml::from_str::<Config>(&content).context("Failed to parse config file")?
        } else if path.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        } else {
            Config::default()
        };

        config.config_path = config_path;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sessionware")
            .join("config.toml")
    }

    /// Apply command-line and environment overrides
    pub fn apply_overrides(&mut self, listen: Option<String>, keys: Vec<String>) {
        if let Some(listen) = listen {
            self.listen = listen;
        }
        if !keys.is_empty() {
            self.session.keys = keys;
        }
    }
}
