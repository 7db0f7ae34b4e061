//! In-memory storage provider for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::provider::{validate_name, Metadata, StorageProvider};
use envsync_common::{Error, Result};

/// In-memory storage provider.
///
/// All data is stored in memory and lost on drop.
#[derive(Default)]
pub struct MemoryProvider {
    objects: RwLock<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryProvider {
    /// Create a new empty memory provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite an object without going through the provider API.
    ///
    /// Lets tests simulate on-disk corruption.
    pub fn tamper(&self, name: &str, f: impl FnOnce(&mut Vec<u8>)) {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((data, _)) = objects.get_mut(name) {
            f(data);
        }
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<Metadata> {
        validate_name(name)?;

        let modified = Utc::now();
        let metadata = Metadata {
            name: name.to_string(),
            size: data.len() as u64,
            modified,
        };

        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), (data, modified));

        Ok(metadata)
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;

        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", name)))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", name)))
    }

    async fn list(&self) -> Result<Vec<Metadata>> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, (data, modified))| Metadata {
                name: name.clone(),
                size: data.len() as u64,
                modified: *modified,
            })
            .collect())
    }
}
