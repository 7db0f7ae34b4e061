//! Common error types for EnvSync.

use thiserror::Error;

/// Top-level error type for EnvSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Vault operation failed.
    #[error("Vault error: {0}")]
    Vault(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The master password did not open the vault.
    #[error("Invalid password")]
    InvalidPassword,

    /// The vault must be unlocked first.
    #[error("Vault is locked")]
    VaultLocked,

    /// No vault exists at the configured location.
    #[error("Vault not initialized")]
    NotInitialized,

    /// A vault already exists at the configured location.
    #[error("Vault already initialized")]
    AlreadyInitialized,

    /// Too many failed unlock attempts.
    #[error("Too many failed attempts, try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
