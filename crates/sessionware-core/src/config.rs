//! File-based session configuration.
//!
//! [`SessionConfig`] is the serde/TOML form of [`SessionOptions`]. Converting
//! it with [`SessionConfig::into_options`] validates everything, including the
//! store definition, so a bad setup stops the process at startup.
//!
//! ```toml
//! key = "session"
//! max_age = 86400000      # milliseconds, or "session"
//! keys = ["at least thirty-two bytes of secret material"]
//! rolling = false
//!
//! [store]
//! backend = "memory"      # or "sqlite" with `path`
//! sweep_interval_secs = 60
//! ```

use cookie::SameSite;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::options::{DEFAULT_KEY, MaxAge, SessionOptions};
use crate::store::{DEFAULT_SWEEP_INTERVAL, MemoryStore, SessionStore};

/// Session configuration as read from a file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name / store key
    pub key: String,

    /// Session lifetime in milliseconds, or "session"
    #[serde(alias = "maxAge")]
    pub max_age: Option<MaxAge>,

    /// Deprecated lowercase spelling of `max_age`
    #[serde(rename = "maxage", skip_serializing)]
    pub legacy_max_age: Option<MaxAge>,

    pub overwrite: bool,

    #[serde(alias = "httpOnly")]
    pub http_only: bool,

    pub signed: bool,

    pub rolling: bool,

    pub renew: bool,

    #[serde(alias = "autoCommit")]
    pub auto_commit: bool,

    /// Prefix for generated store keys
    pub prefix: String,

    pub path: String,

    pub domain: Option<String>,

    pub secure: bool,

    /// "strict", "lax" or "none"
    #[serde(alias = "sameSite")]
    pub same_site: Option<String>,

    /// Signing secrets, first one signs
    pub keys: Vec<String>,

    /// External store; cookie storage when absent
    pub store: Option<StoreConfig>,
}

/// External store definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "sqlite"
    pub backend: String,

    /// Database file for the sqlite backend
    pub path: Option<PathBuf>,

    /// Seconds between expired-entry sweeps, default 60
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            max_age: None,
            legacy_max_age: None,
            overwrite: true,
            http_only: true,
            signed: true,
            rolling: false,
            renew: false,
            auto_commit: true,
            prefix: String::new(),
            path: "/".to_string(),
            domain: None,
            secure: false,
            same_site: None,
            keys: Vec::new(),
            store: None,
        }
    }
}

impl SessionConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Lifetime after resolving the deprecated `maxage` spelling
    pub fn resolved_max_age(&self) -> MaxAge {
        match (self.max_age, self.legacy_max_age) {
            (Some(max_age), _) => max_age,
            (None, Some(legacy)) => {
                warn!("session option `maxage` is deprecated, use `max_age`");
                legacy
            }
            (None, None) => MaxAge::default(),
        }
    }

    /// Validate and convert into runtime options
    pub fn into_options(self) -> Result<Arc<SessionOptions>> {
        self.into_builder()?.build()
    }

    /// Convert into an unbuilt options builder for further adjustment.
    ///
    /// The store is instantiated here, so backend errors surface already.
    pub fn into_builder(self) -> Result<SessionOptions> {
        let mut options = SessionOptions::new()
            .with_key(self.key.clone())
            .with_max_age(self.resolved_max_age())
            .with_overwrite(self.overwrite)
            .with_http_only(self.http_only)
            .with_signed(self.signed)
            .with_rolling(self.rolling)
            .with_renew(self.renew)
            .with_auto_commit(self.auto_commit)
            .with_prefix(self.prefix)
            .with_path(self.path)
            .with_secure(self.secure)
            .with_secrets(&self.keys);

        if let Some(domain) = self.domain {
            options = options.with_domain(domain);
        }

        if let Some(same_site) = self.same_site.as_deref() {
            options = options.with_same_site(parse_same_site(same_site)?);
        }

        if let Some(store) = &self.store {
            options = options.with_shared_store(store.build()?);
        }

        Ok(options)
    }
}

impl StoreConfig {
    fn sweep_interval(&self) -> Duration {
        self.sweep_interval_secs
            .map_or(DEFAULT_SWEEP_INTERVAL, Duration::from_secs)
    }

    /// Instantiate the configured backend
    pub fn build(&self) -> Result<Arc<dyn SessionStore>> {
        match self.backend.to_ascii_lowercase().as_str() {
            "memory" => Ok(Arc::new(MemoryStore::with_sweep_interval(self.sweep_interval()))),
            "sqlite" => self.build_sqlite(),
            other => Err(Error::config(
                "store.backend",
                format!("unknown backend {other:?} (expected \"memory\" or \"sqlite\")"),
            )),
        }
    }

    #[cfg(feature = "db")]
    fn build_sqlite(&self) -> Result<Arc<dyn SessionStore>> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| Error::config("store.path", "required for the sqlite backend"))?;
        let store = crate::store::SqliteStore::open(path)?;
        Ok(Arc::new(store.with_sweep_interval(self.sweep_interval())))
    }

    #[cfg(not(feature = "db"))]
    fn build_sqlite(&self) -> Result<Arc<dyn SessionStore>> {
        Err(Error::config(
            "store.backend",
            "the sqlite backend requires the `db` feature",
        ))
    }
}

fn parse_same_site(value: &str) -> Result<SameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Ok(SameSite::Strict),
        "lax" => Ok(SameSite::Lax),
        "none" => Ok(SameSite::None),
        other => Err(Error::config(
            "same_site",
            format!("{other:?} is not one of strict, lax, none"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.key, "session");
        assert!(config.overwrite);
        assert!(config.http_only);
        assert!(config.signed);
        assert_eq!(config.resolved_max_age(), MaxAge::ONE_DAY);
        assert!(config.store.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config = SessionConfig::from_toml_str(&format!(
            r#"
            key = "sid"
            max_age = 3600000
            rolling = true
            same_site = "Lax"
            keys = ["{SECRET}"]

            [store]
            backend = "memory"
            sweep_interval_secs = 5
            "#
        ))
        .unwrap();

        assert_eq!(config.key, "sid");
        let store = config.store.as_ref().unwrap();
        assert_eq!(store.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.resolved_max_age(), MaxAge::from_millis(3_600_000));

        let options = config.into_options().unwrap();
        assert_eq!(options.key, "sid");
        assert!(options.rolling);
        assert_eq!(options.same_site, Some(SameSite::Lax));
        assert!(options.store().is_some());
    }

    #[test]
    fn test_camel_case_aliases() {
        let config = SessionConfig::from_toml_str(
            r#"
            maxAge = "session"
            httpOnly = false
            "#,
        )
        .unwrap();
        assert_eq!(config.resolved_max_age(), MaxAge::Session);
        assert!(!config.http_only);
    }

    #[test]
    fn test_legacy_maxage() {
        let config = SessionConfig::from_toml_str("maxage = 60000").unwrap();
        assert_eq!(
            config.resolved_max_age(),
            MaxAge::Duration(Duration::from_secs(60))
        );

        // The canonical spelling wins
        let config = SessionConfig::from_toml_str("maxage = 60000\nmax_age = 1000").unwrap();
        assert_eq!(config.resolved_max_age(), MaxAge::from_millis(1000));
    }

    #[test]
    fn test_unknown_store_fails_at_setup() {
        let config = SessionConfig::from_toml_str(&format!(
            r#"
            keys = ["{SECRET}"]
            [store]
            backend = "redis"
            "#
        ))
        .unwrap();

        let err = config.into_options().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("store.backend"));
    }

    #[test]
    fn test_store_without_backend_fails_to_parse() {
        let result = SessionConfig::from_toml_str("[store]\npath = \"sessions.db\"");
        assert!(result.is_err());
    }

    #[cfg(feature = "db")]
    #[test]
    fn test_sqlite_store_requires_path() {
        let mut config = SessionConfig::default();
        config.keys = vec![SECRET.to_string()];
        config.store = Some(StoreConfig {
            backend: "sqlite".into(),
            path: None,
            sweep_interval_secs: None,
        });

        let err = config.into_options().unwrap_err();
        assert!(err.to_string().contains("store.path"));
    }

    #[cfg(feature = "db")]
    #[test]
    fn test_sqlite_store_from_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::default();
        config.keys = vec![SECRET.to_string()];
        config.store = Some(StoreConfig {
            backend: "sqlite".into(),
            path: Some(temp_dir.path().join("sessions.db")),
            sweep_interval_secs: None,
        });

        assert!(config.into_options().unwrap().store().is_some());
    }

    #[test]
    fn test_invalid_values_fail() {
        let mut config = SessionConfig::default();
        config.keys = vec![SECRET.to_string()];
        config.same_site = Some("sometimes".into());
        assert!(config.into_options().is_err());

        // Missing secret for signed cookies
        assert!(SessionConfig::default().into_options().is_err());

        let mut config = SessionConfig::default();
        config.keys = vec!["too short".into()];
        assert!(config.into_options().is_err());
    }

    #[test]
    fn test_into_builder_allows_adjustment() {
        let options = SessionConfig::default()
            .into_builder()
            .unwrap()
            .with_random_secret()
            .build()
            .unwrap();
        assert_eq!(options.keys().len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("session.toml");
        std::fs::write(&path, format!("key = \"app\"\nkeys = [\"{SECRET}\"]\n")).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.key, "app");
        assert!(config.into_options().is_ok());

        assert!(SessionConfig::load(&temp_dir.path().join("missing.toml")).is_err());
    }
}
