//! SQLite-backed audit trail.
//!
//! Every entry is linked to the previous one by a BLAKE2b hash chain, so
//! editing or deleting an entry in the database is detectable with
//! [`AuditLog::verify_chain`]. Entries never contain secret values.

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use envsync_common::{Error, Result};
use envsync_crypto::{constant_time_eq, digest, to_hex};

/// Hash of the (virtual) entry before the first one.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kinds of audited events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    VaultInitialized,
    VaultUnlocked,
    UnlockFailed,
    VaultLocked,
    VaultAutoLocked,
    PasswordChanged,
    ProjectCreated,
    ProjectUpdated,
    ProjectDeleted,
    EnvironmentCreated,
    EnvironmentDeleted,
    VariableWritten,
    VariableDeleted,
    EnvironmentExported,
    EnvironmentImported,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VaultInitialized => "vault_initialized",
            Self::VaultUnlocked => "vault_unlocked",
            Self::UnlockFailed => "unlock_failed",
            Self::VaultLocked => "vault_locked",
            Self::VaultAutoLocked => "vault_auto_locked",
            Self::PasswordChanged => "password_changed",
            Self::ProjectCreated => "project_created",
            Self::ProjectUpdated => "project_updated",
            Self::ProjectDeleted => "project_deleted",
            Self::EnvironmentCreated => "environment_created",
            Self::EnvironmentDeleted => "environment_deleted",
            Self::VariableWritten => "variable_written",
            Self::VariableDeleted => "variable_deleted",
            Self::EnvironmentExported => "environment_exported",
            Self::EnvironmentImported => "environment_imported",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub target: Option<String>,
    pub details: Option<String>,
    pub prev_hash: String,
    pub hash: String,
}

fn entry_hash(
    prev_hash: &str,
    timestamp: &str,
    event: &str,
    target: Option<&str>,
    details: Option<&str>,
) -> String {
    to_hex(&digest(&[
        prev_hash.as_bytes(),
        timestamp.as_bytes(),
        event.as_bytes(),
        presence(target),
        target.unwrap_or("").as_bytes(),
        presence(details),
        details.unwrap_or("").as_bytes(),
    ]))
}

/// Marks whether an optional field is set, so `NULL` and `''` hash apart.
fn presence(field: Option<&str>) -> &'static [u8] {
    if field.is_some() {
        &[1]
    } else {
        &[0]
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(format!("Audit database error: {}", e))
}

/// Append-only audit log.
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    /// Create or open an audit database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event TEXT NOT NULL,
                target TEXT,
                details TEXT,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;

        debug!("Audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory log (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Append an entry.
    pub fn record(
        &self,
        event: AuditEvent,
        target: Option<&str>,
        details: Option<&str>,
    ) -> Result<AuditEntry> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        let prev_hash: String = conn
            .query_row(
                "SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let timestamp = Utc::now();
        let ts = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        let hash = entry_hash(&prev_hash, &ts, event.as_str(), target, details);

        conn.execute(
            r#"
            INSERT INTO audit_log (timestamp, event, target, details, prev_hash, hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![ts, event.as_str(), target, details, prev_hash, hash],
        )
        .map_err(db_err)?;

        debug!(event = event.as_str(), "Audit entry recorded");
        Ok(AuditEntry {
            seq: conn.last_insert_rowid(),
            timestamp,
            event: event.as_str().to_string(),
            target: target.map(String::from),
            details: details.map(String::from),
            prev_hash,
            hash,
        })
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                r#"
                SELECT seq, timestamp, event, target, details, prev_hash, hash
                FROM audit_log ORDER BY seq DESC LIMIT ?1
                "#,
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                let ts: String = row.get(1)?;
                let timestamp = DateTime::parse_from_rfc3339(&ts)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                Ok(AuditEntry {
                    seq: row.get(0)?,
                    timestamp,
                    event: row.get(2)?,
                    target: row.get(3)?,
                    details: row.get(4)?,
                    prev_hash: row.get(5)?,
                    hash: row.get(6)?,
                })
            })
            .map_err(db_err)?;

        let entries = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(entries)
    }

    /// Recompute the hash chain.
    ///
    /// Returns `false` if any entry was modified, removed or reordered.
    pub fn verify_chain(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                "SELECT seq, timestamp, event, target, details, prev_hash, hash \
                 FROM audit_log ORDER BY seq ASC",
            )
            .map_err(db_err)?;

        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut expected_prev = GENESIS_HASH.to_string();

        while let Some(row) = rows.next().map_err(db_err)? {
            let seq: i64 = row.get(0).map_err(db_err)?;
            let ts: String = row.get(1).map_err(db_err)?;
            let event: String = row.get(2).map_err(db_err)?;
            let target: Option<String> = row.get(3).map_err(db_err)?;
            let details: Option<String> = row.get(4).map_err(db_err)?;
            let prev_hash: String = row.get(5).map_err(db_err)?;
            let hash: String = row.get(6).map_err(db_err)?;

            let computed = entry_hash(
                &prev_hash,
                &ts,
                &event,
                target.as_deref(),
                details.as_deref(),
            );
            if !constant_time_eq(prev_hash.as_bytes(), expected_prev.as_bytes())
                || !constant_time_eq(computed.as_bytes(), hash.as_bytes())
            {
                warn!(seq, "Audit chain broken");
                return Ok(false);
            }
            expected_prev = hash;
        }

        Ok(true)
    }

    #[cfg(test)]
    fn execute_raw(&self, sql: &str) {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(sql).unwrap();
    }
}
