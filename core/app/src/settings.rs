//! Runtime settings loaded from `ENVSYNC_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use envsync_common::{Error, Result};
use envsync_crypto::KdfParams;

use crate::controller::ControllerOptions;
use crate::rate_limit::RateLimitConfig;

pub const DATA_DIR_VAR: &str = "ENVSYNC_DATA_DIR";
pub const KDF_VAR: &str = "ENVSYNC_KDF";
pub const AUTO_LOCK_VAR: &str = "ENVSYNC_AUTO_LOCK_SECS";
pub const MAX_ATTEMPTS_VAR: &str = "ENVSYNC_MAX_UNLOCK_ATTEMPTS";
pub const LOCKOUT_VAR: &str = "ENVSYNC_LOCKOUT_SECS";
pub const LOG_VAR: &str = "ENVSYNC_LOG";

/// Audit database file name inside the data directory.
pub const AUDIT_DB_FILENAME: &str = "audit.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding `vault.config`, `vault.data` and `audit.db`.
    pub data_dir: PathBuf,
    /// KDF parameters for newly created vaults.
    pub kdf_params: KdfParams,
    /// Inactivity timeout; `None` disables auto-lock.
    pub auto_lock: Option<Duration>,
    pub max_unlock_attempts: u32,
    pub lockout: Duration,
    /// Default tracing filter directive.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            kdf_params: KdfParams::default(),
            auto_lock: Some(Duration::from_secs(300)),
            max_unlock_attempts: 5,
            lockout: Duration::from_secs(300),
            log_level: "info".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("envsync")
}

fn parse_u64(var: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{} must be a whole number, got '{}'", var, raw)))
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`, falling back to defaults for unset
    /// variables.
    ///
    /// # Errors
    /// - `Error::InvalidInput` for unparsable numbers or an unknown KDF
    ///   preset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(dir) = lookup(DATA_DIR_VAR).filter(|v| !v.trim().is_empty()) {
            settings.data_dir = PathBuf::from(dir);
        }

        if let Some(name) = lookup(KDF_VAR) {
            settings.kdf_params = KdfParams::from_name(&name).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{} must be interactive, moderate or sensitive, got '{}'",
                    KDF_VAR, name
                ))
            })?;
        }

        if let Some(raw) = lookup(AUTO_LOCK_VAR) {
            settings.auto_lock = match parse_u64(AUTO_LOCK_VAR, &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            };
        }

        if let Some(raw) = lookup(MAX_ATTEMPTS_VAR) {
            let attempts = parse_u64(MAX_ATTEMPTS_VAR, &raw)?;
            if attempts == 0 || attempts > u64::from(u32::MAX) {
                return Err(Error::InvalidInput(format!(
                    "{} must be at least 1",
                    MAX_ATTEMPTS_VAR
                )));
            }
            settings.max_unlock_attempts = attempts as u32;
        }

        if let Some(raw) = lookup(LOCKOUT_VAR) {
            settings.lockout = Duration::from_secs(parse_u64(LOCKOUT_VAR, &raw)?);
        }

        if let Some(level) = lookup(LOG_VAR).filter(|v| !v.trim().is_empty()) {
            settings.log_level = level;
        }

        Ok(settings)
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.data_dir.join(AUDIT_DB_FILENAME)
    }

    /// Controller options derived from these settings.
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            auto_lock: self.auto_lock,
            rate_limit: RateLimitConfig {
                max_attempts: self.max_unlock_attempts,
                lockout: self.lockout,
                ..RateLimitConfig::default()
            },
        }
    }
}
