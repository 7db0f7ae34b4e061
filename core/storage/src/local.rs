//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::provider::{validate_name, Metadata, StorageProvider};
use envsync_common::{Error, Result};

/// Suffix of in-progress writes; never reported by `list`.
const TEMP_SUFFIX: &str = ".tmp";

/// Local filesystem storage provider.
///
/// Stores each object as a file directly under the root directory.
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this provider.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn create_metadata(name: &str, fs_meta: &std::fs::Metadata) -> Metadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        Metadata {
            name: name.to_string(),
            size: fs_meta.len(),
            modified,
        }
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<Metadata> {
        let fs_path = self.to_fs_path(name)?;
        let tmp_path = self.root.join(format!("{}{}", name, TEMP_SUFFIX));

        // Readers only ever see a complete file.
        fs::write(&tmp_path, &data).await?;
        if let Err(e) = fs::rename(&tmp_path, &fs_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(object = name, size = data.len(), "Object written");
        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(Self::create_metadata(name, &fs_meta))
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(name)?;

        match fs::read(&fs_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let fs_path = self.to_fs_path(name)?;
        Ok(fs::try_exists(&fs_path).await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let fs_path = self.to_fs_path(name)?;

        match fs::remove_file(&fs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Metadata>> {
        let mut results = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let fs_meta = entry.metadata().await?;
            if !fs_meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            results.push(Self::create_metadata(&name, &fs_meta));
        }

        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}
