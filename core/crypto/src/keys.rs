//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::{decrypt, encrypt};
use envsync_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Key derived from the master password.
///
/// Only ever used to wrap and unwrap the [`DataKey`]; it never touches
/// vault contents directly.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Encrypt a data key under this master key.
    pub fn wrap(&self, data_key: &DataKey) -> Result<Vec<u8>> {
        encrypt(&self.key, data_key.as_bytes())
    }

    /// Recover a data key wrapped by [`MasterKey::wrap`].
    ///
    /// # Errors
    /// - `Error::InvalidPassword` when authentication fails, i.e. this
    ///   master key was derived from the wrong password
    /// - `Error::Crypto` when the unwrapped key has the wrong length
    pub fn unwrap(&self, wrapped: &[u8]) -> Result<DataKey> {
        let mut plain = decrypt(&self.key, wrapped).map_err(|_| Error::InvalidPassword)?;
        if plain.len() != KEY_LENGTH {
            plain.zeroize();
            return Err(Error::Crypto("Wrapped key has invalid length".to_string()));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&plain);
        plain.zeroize();
        Ok(DataKey::from_bytes(key))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Random key encrypting the vault document.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    key: [u8; KEY_LENGTH],
}

impl DataKey {
    /// Create a data key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random data key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey([REDACTED])")
    }
}

/// Salt for key derivation. Serialized as base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

impl Serialize for Salt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Salt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; SALT_LENGTH] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("salt must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let master = MasterKey::from_bytes([1u8; KEY_LENGTH]);
        let data_key = DataKey::generate();

        let wrapped = master.wrap(&data_key).unwrap();
        let unwrapped = master.unwrap(&wrapped).unwrap();

        assert_eq!(unwrapped.as_bytes(), data_key.as_bytes());
    }

    #[test]
    fn test_unwrap_with_wrong_master_is_invalid_password() {
        let wrapped = MasterKey::from_bytes([1u8; KEY_LENGTH])
            .wrap(&DataKey::generate())
            .unwrap();

        let err = MasterKey::from_bytes([2u8; KEY_LENGTH])
            .unwrap(&wrapped)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPassword));
    }

    #[test]
    fn test_data_key_generate() {
        assert_ne!(DataKey::generate().as_bytes(), DataKey::generate().as_bytes());
    }

    #[test]
    fn test_salt_base64_serde() {
        let salt = Salt::from_bytes([9u8; SALT_LENGTH]);
        let json = serde_json::to_string(&salt).unwrap();
        assert!(json.starts_with('"'));

        let back: Salt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, salt);

        assert!(serde_json::from_str::<Salt>("\"c2hvcnQ=\"").is_err());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let rendered = format!("{:?}", DataKey::from_bytes([0xAB; KEY_LENGTH]));
        assert_eq!(rendered, "DataKey([REDACTED])");
    }
}
