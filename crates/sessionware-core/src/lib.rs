//! sessionware-core - Request sessions backed by signed cookies or external stores
//!
//! This crate provides the session lifecycle shared by the middleware and the demo server:
//!
//! - **session**: The session value handed to handlers, and its per-request lifecycle
//! - **codec**: Cookie payload encoding and content fingerprints
//! - **cookies**: Reading and signing session cookies
//! - **store**: Pluggable external session storage
//! - **options**: Runtime options and file-based configuration
//! - **middleware**: axum integration (feature `axum`)

pub mod codec;
pub mod config;
pub mod cookies;
pub mod error;
#[cfg(feature = "axum")]
pub mod middleware;
pub mod options;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use codec::{JsonBase64Codec, SessionCodec};
pub use config::{SessionConfig, StoreConfig};
pub use error::{Error, Result};
#[cfg(feature = "axum")]
pub use middleware::{SessionHandle, session_middleware};
pub use options::{MaxAge, SessionOptions};
pub use session::{CommitOutcome, SaveReason, Session, SessionLifecycle};
pub use store::{MemoryStore, SessionStore, StoreOptions};

#[cfg(feature = "db")]
pub use store::SqliteStore;

pub use cookie::SameSite;
