//! Error types for sessionware-core.

use thiserror::Error;

/// Result type alias using sessionware-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for session operations
///
/// Load-path problems (bad signature, corrupt payload, expiry, store miss) never
/// surface here; they degrade to "no session". What remains are backend faults
/// at commit time and configuration faults at startup.
#[derive(Error, Debug)]
pub enum Error {
    // Store errors
    #[error("Session store error: {0}")]
    Store(String),

    #[cfg(feature = "db")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    // Configuration errors
    #[error("Invalid session option {field}: {message}")]
    Config { field: String, message: String },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Request errors
    #[error("Session middleware is not installed for this route")]
    MissingLayer,

    #[error("Invalid Set-Cookie header: {0}")]
    InvalidHeader(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error for a named option
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Check if this error was raised while validating configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::ConfigParse(_))
    }

    /// Stable machine-readable code for HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "SESSION_STORE_ERROR",
            #[cfg(feature = "db")]
            Self::Database(_) => "SESSION_STORE_ERROR",
            Self::LockPoisoned => "SESSION_STORE_ERROR",
            Self::Config { .. } | Self::ConfigParse(_) => "SESSION_CONFIG_ERROR",
            Self::MissingLayer => "SESSION_LAYER_MISSING",
            Self::InvalidHeader(_) => "SESSION_COOKIE_ERROR",
            Self::Io(_) => "SESSION_IO_ERROR",
            Self::Serialization(_) => "SESSION_SERIALIZATION_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("key", "must not be empty");
        assert!(err.is_config());
        assert!(err.to_string().contains("key"));
        assert!(err.to_string().contains("must not be empty"));

        let err = Error::store("connection refused");
        assert!(!err.is_config());
        assert_eq!(err.code(), "SESSION_STORE_ERROR");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::MissingLayer.code(), "SESSION_LAYER_MISSING");
        assert_eq!(
            Error::config("max_age", "zero").code(),
            "SESSION_CONFIG_ERROR"
        );
    }
}
