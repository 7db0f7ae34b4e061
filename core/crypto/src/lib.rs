//! Cryptographic primitives for EnvSync.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Zeroizing key types and the data-key wrapping used by the vault
//! - BLAKE2b digests for the audit hash chain
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time comparison for digests

pub mod aead;
pub mod digest;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, decrypt_with_aad, encrypt, encrypt_with_aad};
pub use digest::{constant_time_eq, digest, to_hex};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DataKey, MasterKey, Salt, KEY_LENGTH};
