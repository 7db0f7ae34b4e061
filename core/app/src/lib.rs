//! Application layer for EnvSync.
//!
//! This crate provides:
//! - The vault session controller that owns lock state and gates the vault
//! - The lock screen view model and the root shell
//! - Auto-lock, unlock rate limiting and the audit trail
//! - Settings loaded from the environment

pub mod audit;
pub mod controller;
pub mod lock_view;
pub mod rate_limit;
pub mod settings;
pub mod shell;

pub use audit::{AuditEntry, AuditEvent, AuditLog};
pub use controller::{
    ControllerOptions, SessionController, SessionSnapshot, VaultController, VaultPhase,
    VaultStatus, MIN_PASSWORD_LENGTH,
};
pub use lock_view::{validate_new_password, LockMode, LockView, SubmitOutcome};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use settings::Settings;
pub use shell::{AppShell, Screen};
