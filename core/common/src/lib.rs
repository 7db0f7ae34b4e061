//! Common utilities and types shared across EnvSync crates.
//!
//! The error type here is the one every lower layer returns; the secret
//! wrapper is how plaintext values and passwords travel between layers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::SecretString;
