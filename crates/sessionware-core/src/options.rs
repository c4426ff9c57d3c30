//! Runtime session options.
//!
//! Options are assembled once at startup with the `with_*` builder methods and
//! frozen by [`SessionOptions::build`], which validates them and derives the
//! cookie signing keys. Anything wrong with the setup fails there, never per
//! request.

use cookie::{Key, SameSite};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{JsonBase64Codec, SessionCodec};
use crate::error::{Error, Result};
use crate::store::SessionStore;

/// Default cookie / store lookup key
pub const DEFAULT_KEY: &str = "session";

/// Minimum length of a signing secret in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Longest accepted `max_age`; expiry timestamps stay within `i64` milliseconds
pub const MAX_LIFETIME: Duration = Duration::from_millis(i64::MAX as u64 / 2);

/// Session lifetime: a fixed duration, or scoped to the browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
    /// Expire after the given duration
    Duration(Duration),
    /// No expiry attribute; the cookie dies with the browser session
    Session,
}

impl MaxAge {
    /// One day, the default lifetime
    pub const ONE_DAY: MaxAge = MaxAge::Duration(Duration::from_secs(86_400));

    /// Build a duration max age from milliseconds
    pub fn from_millis(ms: u64) -> Self {
        MaxAge::Duration(Duration::from_millis(ms))
    }

    /// Duration in milliseconds, `None` for browser-session scope
    pub fn as_millis(&self) -> Option<u64> {
        self.duration()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Duration, `None` for browser-session scope
    pub fn duration(&self) -> Option<Duration> {
        match self {
            MaxAge::Duration(d) => Some(*d),
            MaxAge::Session => None,
        }
    }

    /// Whether this is the browser-session sentinel
    pub fn is_session(&self) -> bool {
        matches!(self, MaxAge::Session)
    }

    /// Extend a duration max age by `grace`; session scope stays as is.
    pub fn with_grace(self, grace: Duration) -> Self {
        match self {
            MaxAge::Duration(d) => MaxAge::Duration(d.saturating_add(grace)),
            MaxAge::Session => MaxAge::Session,
        }
    }
}

impl Default for MaxAge {
    fn default() -> Self {
        MaxAge::ONE_DAY
    }
}

impl fmt::Display for MaxAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxAge::Duration(d) => write!(f, "{}ms", d.as_millis()),
            MaxAge::Session => write!(f, "session"),
        }
    }
}

// Serialized as integer milliseconds or the string "session".
#[derive(Deserialize)]
#[serde(untagged)]
enum RawMaxAge {
    Millis(u64),
    Keyword(String),
}

impl<'de> Deserialize<'de> for MaxAge {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawMaxAge::deserialize(deserializer)? {
            RawMaxAge::Millis(ms) => Ok(MaxAge::from_millis(ms)),
            RawMaxAge::Keyword(s) if s.eq_ignore_ascii_case("session") => Ok(MaxAge::Session),
            RawMaxAge::Keyword(other) => Err(serde::de::Error::custom(format!(
                "invalid max age {other:?}: expected milliseconds or \"session\""
            ))),
        }
    }
}

impl Serialize for MaxAge {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            MaxAge::Duration(_) => serializer.serialize_u64(self.as_millis().unwrap_or(u64::MAX)),
            MaxAge::Session => serializer.serialize_str("session"),
        }
    }
}

/// External key generator
pub type GenId = Arc<dyn Fn() -> String + Send + Sync>;

/// Session middleware options
#[derive(Clone)]
pub struct SessionOptions {
    /// Cookie name, also the store lookup key
    pub key: String,
    /// Lifetime of newly saved sessions
    pub max_age: MaxAge,
    /// Replace earlier Set-Cookie headers of the same name instead of appending
    pub overwrite: bool,
    /// Mark the cookie HttpOnly
    pub http_only: bool,
    /// Sign the cookie and verify signatures on read
    pub signed: bool,
    /// Re-save on every request, resetting the expiry
    pub rolling: bool,
    /// Re-save when less than half of the max age remains
    pub renew: bool,
    /// Commit automatically when the request completes
    pub auto_commit: bool,
    /// Prefix for generated external keys
    pub prefix: String,
    /// Cookie path
    pub path: String,
    /// Cookie domain
    pub domain: Option<String>,
    /// Mark the cookie Secure
    pub secure: bool,
    /// Cookie SameSite attribute
    pub same_site: Option<SameSite>,
    secrets: Vec<Vec<u8>>,
    keys: Vec<Key>,
    codec: Arc<dyn SessionCodec>,
    store: Option<Arc<dyn SessionStore>>,
    genid: GenId,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            max_age: MaxAge::default(),
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
            secrets: Vec::new(),
            keys: Vec::new(),
            codec: Arc::new(JsonBase64Codec),
            store: None,
            genid: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("key", &self.key)
            .field("max_age", &self.max_age)
            .field("overwrite", &self.overwrite)
            .field("http_only", &self.http_only)
            .field("signed", &self.signed)
            .field("rolling", &self.rolling)
            .field("renew", &self.renew)
            .field("auto_commit", &self.auto_commit)
            .field("prefix", &self.prefix)
            .field("path", &self.path)
            .field("domain", &self.domain)
            .field("secure", &self.secure)
            .field("same_site", &self.same_site)
            .field("secrets", &self.secrets.len())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl SessionOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cookie name / store key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Set the session lifetime
    pub fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.max_age = max_age;
        self
    }

    /// Replace or append same-named Set-Cookie headers
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set the HttpOnly attribute
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Enable or disable cookie signing
    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    /// Re-save on every request
    pub fn with_rolling(mut self, rolling: bool) -> Self {
        self.rolling = rolling;
        self
    }

    /// Re-save when the session is about to expire
    pub fn with_renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    /// Commit automatically at the end of each request
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Prefix for generated external keys
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the cookie path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the cookie domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the Secure attribute
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the SameSite attribute
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Add a signing secret. The first secret signs, all of them verify.
    pub fn with_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.secrets.push(secret.as_ref().to_vec());
        self
    }

    /// Add several signing secrets in priority order
    pub fn with_secrets<I, S>(mut self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.secrets
            .extend(secrets.into_iter().map(|s| s.as_ref().to_vec()));
        self
    }

    /// Add a random signing secret (sessions do not survive a restart)
    pub fn with_random_secret(mut self) -> Self {
        let mut secret = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut secret);
        self.secrets.push(secret.to_vec());
        self
    }

    /// Use a custom cookie codec
    pub fn with_codec(mut self, codec: impl SessionCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Store sessions externally; the cookie then carries only the external key
    pub fn with_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Store sessions in a shared external store
    pub fn with_shared_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom external key generator (the prefix is still prepended)
    pub fn with_genid(mut self, genid: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.genid = Arc::new(genid);
        self
    }

    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::config("key", "must not be empty"));
        }

        if let Some(c) = self.key.chars().find(|c| !is_token_char(*c)) {
            return Err(Error::config(
                "key",
                format!("{c:?} is not allowed in a cookie name"),
            ));
        }

        if self.max_age == MaxAge::Duration(Duration::ZERO) {
            return Err(Error::config(
                "max_age",
                "must be greater than 0 or \"session\"",
            ));
        }

        if self.max_age.duration().is_some_and(|d| d > MAX_LIFETIME) {
            return Err(Error::config(
                "max_age",
                format!("must not exceed {}ms", MAX_LIFETIME.as_millis()),
            ));
        }

        if self.signed && self.secrets.is_empty() {
            return Err(Error::config(
                "keys",
                "signed cookies require at least one secret",
            ));
        }

        if let Some(pos) = self.secrets.iter().position(|s| s.len() < MIN_SECRET_LEN) {
            return Err(Error::config(
                "keys",
                format!("secret #{pos} must be at least {MIN_SECRET_LEN} bytes"),
            ));
        }

        if !self.path.starts_with('/') {
            return Err(Error::config("path", "must start with '/'"));
        }

        Ok(())
    }

    /// Validate and freeze the options for use by the middleware
    pub fn build(mut self) -> Result<Arc<Self>> {
        self.validate()?;
        self.keys = self.secrets.iter().map(|s| Key::derive_from(s)).collect();

        tracing::debug!(
            key = %self.key,
            max_age = %self.max_age,
            signed = self.signed,
            store = self.store.is_some(),
            "session options built"
        );

        Ok(Arc::new(self))
    }

    /// Signing keys, first one signs
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Cookie codec
    pub fn codec(&self) -> &dyn SessionCodec {
        self.codec.as_ref()
    }

    /// External store, if configured
    pub fn store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.store.as_ref()
    }

    /// Generate a fresh external key
    pub fn generate_id(&self) -> String {
        format!("{}{}", self.prefix, (self.genid)())
    }
}

// RFC 6265 cookie-name token characters
fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}
