//! External session storage.
//!
//! When a store is configured the cookie carries only an opaque external key
//! and the payload lives in the store. Backends implement [`SessionStore`]:
//!
//! - [`MemoryStore`]: in-process map with per-entry expiry
//! - [`SqliteStore`]: SQLite table (feature `db`)

mod memory;
#[cfg(feature = "db")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "db")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;
use crate::options::MaxAge;

/// Extra time a store keeps an entry beyond the cookie's own lifetime
pub const STORE_TTL_GRACE: Duration = Duration::from_secs(10);

/// Minimum time between two expired-entry sweeps run from `set`
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Context passed along with store calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// The middleware runs in rolling mode
    pub rolling: bool,
    /// The payload changed since it was loaded
    pub changed: bool,
}

/// Core trait for session storage backends.
///
/// Absence is a normal result of `get`, never an error. Errors from `set` and
/// `destroy` are surfaced to the request as backend faults.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the payload stored under `key`.
    async fn get(&self, key: &str, max_age: MaxAge, opts: StoreOptions) -> Result<Option<Value>>;

    /// Persist `value` under `key` and return the key to hand to the client.
    ///
    /// Implementations may rotate the key; the lifecycle writes whatever is
    /// returned into the cookie.
    async fn set(&self, key: &str, value: Value, max_age: MaxAge, opts: StoreOptions)
    -> Result<String>;

    /// Delete the entry stored under `key`.
    async fn destroy(&self, key: &str, opts: StoreOptions) -> Result<()>;
}
