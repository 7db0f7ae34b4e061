//! Vault engine for EnvSync.
//!
//! This module provides:
//! - Vault creation, unlocking and password changes
//! - The encrypted vault document: projects, environments and variables
//! - Session handling with secure key management
//! - `.env` import and export
//!
//! # Architecture
//! The vault sits between the session controller and a storage provider.
//! The password-derived master key only wraps a random data key; the data
//! key encrypts the whole document, which is rewritten on every change.

pub mod config;
pub mod document;
pub mod dotenv;
pub mod manager;
pub mod session;

pub use config::{VaultConfig, VaultVersion, CONFIG_FILENAME, DATA_FILENAME};
pub use document::{Environment, EnvironmentType, Project, SearchHit, Variable, VaultDocument};
pub use manager::VaultManager;
pub use session::{SessionHandle, SessionState, VaultSession};
