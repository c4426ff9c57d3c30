//! Session value and per-request lifecycle.
//!
//! - [`Session`]: the map-like value handlers read and mutate
//! - [`SessionLifecycle`]: load, change detection and commit for one request

mod lifecycle;

pub use lifecycle::{CommitOutcome, SaveReason, SessionLifecycle};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::Result;
use crate::options::MaxAge;

// Metadata keys persisted next to the public data
const EXPIRE_KEY: &str = "_expire";
const MAX_AGE_KEY: &str = "_maxAge";
const SESSION_SCOPED_KEY: &str = "_session";

/// Wall-clock time in epoch milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Session data for one client.
///
/// Public data is a JSON object. Keys starting with `_` are reserved for
/// metadata and are neither persisted nor part of the change fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    data: Map<String, Value>,
    is_new: bool,
    max_age: Option<MaxAge>,
    expire: Option<i64>,
    require_save: bool,
}

impl Session {
    /// Create an empty session that did not exist before this request
    pub fn new() -> Self {
        Self {
            is_new: true,
            ..Default::default()
        }
    }

    /// Create a session from public data
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            is_new: true,
            ..Default::default()
        }
    }

    /// Restore a session from a decoded payload.
    ///
    /// Returns `None` for anything but a JSON object.
    pub fn from_wire(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };

        let expire = map.remove(EXPIRE_KEY).and_then(|v| v.as_i64());
        let session_scoped = map
            .remove(SESSION_SCOPED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let max_age = match map.remove(MAX_AGE_KEY).and_then(|v| v.as_u64()) {
            _ if session_scoped => Some(MaxAge::Session),
            Some(ms) => Some(MaxAge::from_millis(ms)),
            None => None,
        };
        map.retain(|k, _| !k.starts_with('_'));

        Some(Self {
            data: map,
            is_new: false,
            max_age,
            expire,
            require_save: false,
        })
    }

    /// Payload to persist: public data plus expiry metadata for `max_age`.
    ///
    /// `now_ms` is the wall-clock time in milliseconds; the stored expiry is
    /// updated to match what was written.
    pub fn to_wire(&mut self, max_age: MaxAge, now_ms: i64) -> Value {
        let mut map = self.public_data();
        match max_age {
            MaxAge::Session => {
                map.insert(SESSION_SCOPED_KEY.into(), Value::Bool(true));
                self.expire = None;
            }
            MaxAge::Duration(d) => {
                let ms = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
                let expire = now_ms.saturating_add(ms);
                map.insert(EXPIRE_KEY.into(), Value::from(expire));
                map.insert(MAX_AGE_KEY.into(), Value::from(ms));
                self.expire = Some(expire);
            }
        }
        Value::Object(map)
    }

    /// Public data as a JSON value (what the fingerprint covers)
    pub fn to_json(&self) -> Value {
        Value::Object(self.public_data())
    }

    fn public_data(&self) -> Map<String, Value> {
        self.data
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Get a typed value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a raw JSON value
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Insert a typed value, returning the previous raw value
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.insert_value(key, value))
    }

    /// Insert a raw JSON value, returning the previous one
    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Number of public keys
    pub fn len(&self) -> usize {
        self.data.keys().filter(|k| !k.starts_with('_')).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the session holds any data
    pub fn populated(&self) -> bool {
        !self.is_empty()
    }

    /// Remove all data, keeping the session itself
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Mutable access to the underlying map
    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    /// Whether the session was created during this request
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Per-session lifetime override
    pub fn max_age(&self) -> Option<MaxAge> {
        self.max_age
    }

    /// Override the lifetime for this session; forces a save
    pub fn set_max_age(&mut self, max_age: MaxAge) {
        self.max_age = Some(max_age);
        self.require_save = true;
    }

    /// Absolute expiry in epoch milliseconds, if known
    pub fn expire_at(&self) -> Option<i64> {
        self.expire
    }

    /// Time left before expiry at `now_ms`
    pub fn remaining(&self, now_ms: i64) -> Option<Duration> {
        self.expire
            .map(|at| Duration::from_millis(at.saturating_sub(now_ms).max(0) as u64))
    }

    /// Whether the stored expiry lies in the past
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expire.is_some_and(|at| at < now_ms)
    }

    /// Force a save at commit even if nothing changed
    pub fn save(&mut self) {
        self.require_save = true;
    }

    pub(crate) fn requires_save(&self) -> bool {
        self.require_save
    }
}
