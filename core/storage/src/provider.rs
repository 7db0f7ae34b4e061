//! Storage provider trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use envsync_common::{Error, Result};

/// Metadata for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Object name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Storage provider trait for different backends.
///
/// Implementations must make [`StorageProvider::upload`] all-or-nothing: a
/// reader sees either the previous object or the new one, never a torn
/// write.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Store `data` under `name`, replacing any previous object.
    ///
    /// # Errors
    /// - Invalid object name
    /// - I/O errors
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<Metadata>;

    /// Fetch the object stored under `name`.
    ///
    /// # Errors
    /// - `Error::NotFound` if no such object exists
    async fn download(&self, name: &str) -> Result<Vec<u8>>;

    /// Check if an object exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Delete an object.
    ///
    /// # Errors
    /// - `Error::NotFound` if no such object exists
    async fn delete(&self, name: &str) -> Result<()>;

    /// List all stored objects, sorted by name.
    async fn list(&self) -> Result<Vec<Metadata>>;
}

/// Check that an object name is a single, plain path component.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("Object name cannot be empty".to_string()));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidInput(format!("Invalid object name: {}", name)));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidInput(
            "Object name cannot contain separators".to_string(),
        ));
    }
    Ok(())
}
