//! Vault configuration and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use envsync_common::{Error, Result};
use envsync_crypto::{derive_key, DataKey, KdfParams, Salt};

/// Configuration object name in storage.
pub const CONFIG_FILENAME: &str = "vault.config";

/// Encrypted document object name in storage.
pub const DATA_FILENAME: &str = "vault.data";

/// Vault format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultVersion {
    pub major: u32,
    pub minor: u32,
}

impl VaultVersion {
    /// Current vault format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version is compatible with the current version.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for VaultVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Unencrypted vault configuration.
///
/// Holds everything needed to turn a password into the data key, and
/// nothing that reveals vault contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Unique vault identifier, also bound into the document ciphertext.
    pub id: Uuid,
    /// Vault format version.
    pub version: VaultVersion,
    /// Salt for master key derivation.
    pub salt: Salt,
    /// KDF parameters.
    pub kdf_params: KdfParams,
    /// Vault creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last time the wrapped key changed.
    pub modified_at: DateTime<Utc>,
    /// Data key encrypted under the master key.
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
}

impl VaultConfig {
    /// Create a new vault configuration and its data key.
    ///
    /// # Postconditions
    /// - Salt and data key are randomly generated
    /// - The data key can be recovered with [`VaultConfig::unlock`]
    ///
    /// # Errors
    /// - Password empty
    /// - KDF failure
    pub fn new(password: &[u8], kdf_params: KdfParams) -> Result<(Self, DataKey)> {
        let salt = Salt::generate();
        let master_key = derive_key(password, &salt, &kdf_params)?;
        let data_key = DataKey::generate();
        let wrapped_key = master_key.wrap(&data_key)?;

        let now = Utc::now();
        let config = Self {
            id: Uuid::new_v4(),
            version: VaultVersion::CURRENT,
            salt,
            kdf_params,
            created_at: now,
            modified_at: now,
            wrapped_key,
        };

        Ok((config, data_key))
    }

    /// Recover the data key with a password.
    ///
    /// This is the password check: a wrong password fails authentication
    /// of the wrapped key.
    ///
    /// # Errors
    /// - `Error::InvalidPassword` for a wrong password
    /// - `Error::Vault` for an incompatible format version
    pub fn unlock(&self, password: &[u8]) -> Result<DataKey> {
        if !self.version.is_compatible() {
            return Err(Error::Vault(format!(
                "Incompatible vault version: {}.{}",
                self.version.major, self.version.minor
            )));
        }

        let master_key = derive_key(password, &self.salt, &self.kdf_params)?;
        master_key.unwrap(&self.wrapped_key)
    }

    /// Produce a copy of this config whose data key is wrapped under a new
    /// password and a fresh salt.
    pub fn rewrap(&self, data_key: &DataKey, new_password: &[u8]) -> Result<Self> {
        let salt = Salt::generate();
        let master_key = derive_key(new_password, &salt, &self.kdf_params)?;

        Ok(Self {
            salt,
            wrapped_key: master_key.wrap(data_key)?,
            modified_at: Utc::now(),
            ..self.clone()
        })
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
