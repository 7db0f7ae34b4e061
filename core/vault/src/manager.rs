//! Vault manager for creating, opening and saving the vault.

use std::sync::Arc;

use tokio::task;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::{VaultConfig, CONFIG_FILENAME, DATA_FILENAME};
use crate::document::VaultDocument;
use crate::session::VaultSession;
use envsync_common::{Error, Result};
use envsync_crypto::KdfParams;
use envsync_storage::StorageProvider;

/// Run Argon2 work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Vault(format!("Key derivation task failed: {}", e)))?
}

/// Creates and opens the vault stored in a provider.
pub struct VaultManager {
    provider: Arc<dyn StorageProvider>,
    kdf_params: KdfParams,
}

impl VaultManager {
    /// Create a manager over `provider`. New vaults use `kdf_params`.
    pub fn new(provider: Arc<dyn StorageProvider>, kdf_params: KdfParams) -> Self {
        Self {
            provider,
            kdf_params,
        }
    }

    pub fn provider(&self) -> Arc<dyn StorageProvider> {
        self.provider.clone()
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.kdf_params
    }

    /// Whether a vault config exists in storage.
    pub async fn vault_exists(&self) -> Result<bool> {
        self.provider.exists(CONFIG_FILENAME).await
    }

    /// Create a new, empty vault.
    ///
    /// # Postconditions
    /// - The encrypted empty document is written before the config, so a
    ///   config is never present without data
    /// - Returns an active session
    ///
    /// # Errors
    /// - `Error::AlreadyInitialized` if a vault already exists
    /// - Storage access failure
    pub async fn create_vault(&self, password: &str) -> Result<VaultSession> {
        if self.vault_exists().await? {
            return Err(Error::AlreadyInitialized);
        }

        let password = Zeroizing::new(password.as_bytes().to_vec());
        let params = self.kdf_params.clone();
        let (config, data_key) = blocking(move || VaultConfig::new(&password, params)).await?;

        let document = VaultDocument::new();
        let sealed = document.seal(&data_key, &config.id)?;
        self.provider.upload(DATA_FILENAME, sealed).await?;
        self.provider
            .upload(CONFIG_FILENAME, config.to_bytes()?)
            .await?;

        info!(vault_id = %config.id, "Vault created");
        Ok(VaultSession::open(config, data_key, document))
    }

    /// Load the vault config.
    ///
    /// # Errors
    /// - `Error::NotInitialized` if no vault exists
    pub async fn load_config(&self) -> Result<VaultConfig> {
        if !self.vault_exists().await? {
            return Err(Error::NotInitialized);
        }
        let bytes = self.provider.download(CONFIG_FILENAME).await?;
        VaultConfig::from_bytes(&bytes)
    }

    /// Unlock the vault and decrypt its document.
    ///
    /// # Errors
    /// - `Error::NotInitialized` if no vault exists
    /// - `Error::InvalidPassword` for a wrong password
    /// - `Error::Crypto` if the document was tampered with
    pub async fn open_vault(&self, password: &str) -> Result<VaultSession> {
        let config = self.load_config().await?;

        let password = Zeroizing::new(password.as_bytes().to_vec());
        let unlock_config = config.clone();
        let data_key = blocking(move || unlock_config.unlock(&password)).await?;

        let sealed = self.provider.download(DATA_FILENAME).await?;
        let document = VaultDocument::open(&sealed, &data_key, &config.id)?;

        debug!(vault_id = %config.id, "Vault opened");
        Ok(VaultSession::open(config, data_key, document))
    }

    /// Encrypt and persist `document` for the session's vault.
    pub async fn save_document(&self, session: &VaultSession, document: &VaultDocument) -> Result<()> {
        let sealed = document.seal(session.data_key()?, session.vault_id())?;
        self.provider.upload(DATA_FILENAME, sealed).await?;
        Ok(())
    }

    /// Rewrap the data key under a new password.
    ///
    /// The document is not re-encrypted; only the config is rewritten.
    ///
    /// # Errors
    /// - `Error::VaultLocked` if the session is locked
    /// - `Error::InvalidPassword` if `old_password` is wrong
    pub async fn change_password(
        &self,
        session: &mut VaultSession,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let data_key = session.data_key()?.clone();
        let config = session.config().clone();
        let old = Zeroizing::new(old_password.as_bytes().to_vec());
        let new = Zeroizing::new(new_password.as_bytes().to_vec());

        let new_config = blocking(move || {
            config.unlock(&old)?;
            config.rewrap(&data_key, &new)
        })
        .await?;

        self.provider
            .upload(CONFIG_FILENAME, new_config.to_bytes()?)
            .await?;
        session.set_config(new_config);

        info!(vault_id = %session.vault_id(), "Vault password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fast_params;
    use envsync_storage::{LocalProvider, MemoryProvider};
    use tempfile::TempDir;

    fn manager() -> (VaultManager, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        (VaultManager::new(provider.clone(), fast_params()), provider)
    }

    #[tokio::test]
    async fn test_create_vault() {
        let (manager, provider) = manager();
        assert!(!manager.vault_exists().await.unwrap());

        let session = manager.create_vault("secure-password").await.unwrap();

        assert!(session.is_active());
        assert!(manager.vault_exists().await.unwrap());
        assert!(provider.exists(DATA_FILENAME).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let (manager, _) = manager();
        manager.create_vault("secure-password").await.unwrap();

        let err = manager.create_vault("other-password").await.err().unwrap();
        assert_eq!(err.to_string(), "Vault already initialized");
    }

    #[tokio::test]
    async fn test_open_vault() {
        let (manager, _) = manager();
        let mut session = manager.create_vault("secure-password").await.unwrap();

        let mut document = session.document().unwrap().clone();
        document.create_project("api", None).unwrap();
        manager.save_document(&session, &document).await.unwrap();
        session.replace_document(document).unwrap();
        let vault_id = *session.vault_id();
        drop(session);

        let reopened = manager.open_vault("secure-password").await.unwrap();
        assert_eq!(reopened.vault_id(), &vault_id);
        assert_eq!(reopened.document().unwrap().projects()[0].name, "api");
    }

    #[tokio::test]
    async fn test_open_errors() {
        let (manager, provider) = manager();
        assert!(matches!(
            manager.open_vault("anything").await,
            Err(Error::NotInitialized)
        ));

        manager.create_vault("secure-password").await.unwrap();
        assert!(matches!(
            manager.open_vault("wrong-password").await,
            Err(Error::InvalidPassword)
        ));

        provider.tamper(DATA_FILENAME, |bytes| {
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;
        });
        assert!(matches!(
            manager.open_vault("secure-password").await,
            Err(Error::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let (manager, _) = manager();
        let mut session = manager.create_vault("old-password").await.unwrap();

        assert!(matches!(
            manager
                .change_password(&mut session, "not-it", "new-password")
                .await,
            Err(Error::InvalidPassword)
        ));

        manager
            .change_password(&mut session, "old-password", "new-password")
            .await
            .unwrap();
        drop(session);

        assert!(manager.open_vault("old-password").await.is_err());
        assert!(manager.open_vault("new-password").await.is_ok());
    }

    #[tokio::test]
    async fn test_local_provider_persists() {
        let dir = TempDir::new().unwrap();
        {
            let provider = Arc::new(LocalProvider::new(dir.path()).unwrap());
            let manager = VaultManager::new(provider, fast_params());
            manager.create_vault("secure-password").await.unwrap();
        }

        let provider = Arc::new(LocalProvider::new(dir.path()).unwrap());
        let manager = VaultManager::new(provider, fast_params());
        assert!(manager.open_vault("secure-password").await.is_ok());
    }
}
