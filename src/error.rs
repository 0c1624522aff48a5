//! Error types for the Sentinel gateway

use thiserror::Error;

/// Result type alias for Sentinel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Sentinel gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, malformed config file)
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera or microphone could not be acquired
    #[error("media access error: {0}")]
    MediaAccess(String),

    /// Perception channel failure (handshake, protocol, transport)
    #[error("remote error: {0}")]
    Remote(String),

    /// Local audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Video frame encoding error
    #[error("video error: {0}")]
    Video(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
