//! Error types for JustPost

use thiserror::Error;

use crate::types::PlatformId;

pub type Result<T> = std::result::Result<T, JustPostError>;

#[derive(Error, Debug)]
pub enum JustPostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret store error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid state token: {0}")]
    State(#[from] StateTokenError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl JustPostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            JustPostError::InvalidInput(_) => 3,
            JustPostError::State(_) => 3,
            JustPostError::Platform(PlatformError::Authentication(_)) => 2,
            JustPostError::Platform(_) => 1,
            JustPostError::Config(_) => 1,
            JustPostError::Store(_) => 1,
        }
    }

    /// True for errors that must stop a flow before any network call.
    pub fn is_configuration(&self) -> bool {
        matches!(self, JustPostError::Config(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Platform not configured: {0}")]
    PlatformNotConfigured(PlatformId),
}

/// Failures inside the secret store.
///
/// These never escape [`crate::store::SecretStore`]; the facade logs them and
/// reports `None`/`false` instead.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTokenError {
    #[error("missing application prefix")]
    MissingPrefix,

    #[error("payload is not valid base64")]
    InvalidEncoding,

    #[error("payload is not a valid platform/nonce pair")]
    InvalidPayload,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("State mismatch: {0}")]
    StateMismatch(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Not connected to {0}")]
    NotConnected(PlatformId),
}

impl PlatformError {
    /// Whether the failure means the stored credentials are no longer usable.
    pub fn is_authentication(&self) -> bool {
        matches!(self, PlatformError::Authentication(_))
    }
}
