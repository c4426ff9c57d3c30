//! Application state.

use anyhow::{Context, Result};
use sessionware_core::SessionOptions;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Validated session options shared with the middleware
    pub session_options: Arc<SessionOptions>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, session_options: Arc<SessionOptions>) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            session_options,
            start_time: Instant::now(),
        })
    }

    /// Build state from configuration, failing on invalid session settings.
    ///
    /// With `dev_key` and no configured keys, a random signing secret is used.
    pub fn from_config(config: Config, dev_key: bool) -> Result<Arc<Self>> {
        let mut builder = config
            .session
            .clone()
            .into_builder()
            .context("Invalid session configuration")?;

        if dev_key && config.session.keys.is_empty() {
            warn!("No signing keys configured, using a random development key");
            builder = builder.with_random_secret();
        }

        let session_options = builder.build().context("Invalid session configuration")?;
        Ok(Self::new(config, session_options))
    }
}
