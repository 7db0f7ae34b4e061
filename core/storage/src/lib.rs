//! Storage provider abstraction for EnvSync.
//!
//! Vault files are opaque, already-encrypted blobs addressed by a flat
//! object name (`vault.config`, `vault.data`). Providers only move bytes.
//!
//! # Design Principles
//! - Provider isolation: no provider-specific logic in vault or crypto code
//! - Async operations: all I/O operations are async
//! - Whole-object writes replace the previous object atomically

pub mod local;
pub mod memory;
pub mod provider;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{validate_name, Metadata, StorageProvider};
