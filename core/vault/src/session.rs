//! Vault session management.
//!
//! A session holds the data key and the decrypted document in memory.
//! Both are dropped when the session is locked or dropped, and the key is
//! zeroized on drop.

use uuid::Uuid;

use crate::config::VaultConfig;
use crate::document::VaultDocument;
use envsync_common::{Error, Result};
use envsync_crypto::DataKey;

/// Session handle for tracking active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Key and document are available.
    Active,
    /// Key and document have been cleared.
    Locked,
}

/// An unlocked vault.
pub struct VaultSession {
    handle: SessionHandle,
    config: VaultConfig,
    data_key: Option<DataKey>,
    document: VaultDocument,
    state: SessionState,
}

impl VaultSession {
    /// Wrap an already unlocked vault in an active session.
    pub fn open(config: VaultConfig, data_key: DataKey, document: VaultDocument) -> Self {
        Self {
            handle: SessionHandle::new(),
            config,
            data_key: Some(data_key),
            document,
            state: SessionState::Active,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn vault_id(&self) -> &Uuid {
        &self.config.id
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Replace the config after a password change.
    pub fn set_config(&mut self, config: VaultConfig) {
        self.config = config;
    }

    /// Get the data key, if the session is active.
    ///
    /// # Errors
    /// - `Error::VaultLocked` if the session is locked
    pub fn data_key(&self) -> Result<&DataKey> {
        match self.state {
            SessionState::Active => self.data_key.as_ref().ok_or(Error::VaultLocked),
            SessionState::Locked => Err(Error::VaultLocked),
        }
    }

    /// Get the decrypted document, if the session is active.
    pub fn document(&self) -> Result<&VaultDocument> {
        match self.state {
            SessionState::Active => Ok(&self.document),
            SessionState::Locked => Err(Error::VaultLocked),
        }
    }

    /// Swap in a document that has already been persisted.
    pub fn replace_document(&mut self, document: VaultDocument) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(Error::VaultLocked);
        }
        self.document = document;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Lock the session, clearing the key and the document from memory.
    pub fn lock(&mut self) {
        // DataKey zeroizes itself on drop.
        self.data_key = None;
        self.document = VaultDocument::default();
        self.state = SessionState::Locked;
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fast_params;

    fn create_test_session() -> VaultSession {
        let (config, data_key) = VaultConfig::new(b"test-password", fast_params()).unwrap();
        let mut document = VaultDocument::new();
        document.create_project("api", None).unwrap();
        VaultSession::open(config, data_key, document)
    }

    #[test]
    fn test_session_creation() {
        let session = create_test_session();
        assert!(session.is_active());
        assert!(session.data_key().is_ok());
        assert_eq!(session.document().unwrap().projects().len(), 1);
        assert_eq!(session.vault_id(), &session.config().id);
    }

    #[test]
    fn test_session_lock() {
        let mut session = create_test_session();
        session.lock();

        assert!(!session.is_active());
        assert_eq!(session.state(), SessionState::Locked);
        assert!(matches!(session.data_key(), Err(Error::VaultLocked)));
        assert!(matches!(session.document(), Err(Error::VaultLocked)));
        assert!(session.replace_document(VaultDocument::new()).is_err());
    }

    #[test]
    fn test_handles_are_unique() {
        assert_ne!(SessionHandle::new(), SessionHandle::new());
    }
}
