//! Brute-force protection for unlock attempts.
//!
//! Failure times are wall-clock timestamps. A limiter opened over a
//! database file keeps them in SQLite, so a lockout outlives the process
//! that triggered it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use envsync_common::{Error, Result};

/// Upper bound on the lockout multiplier.
const MAX_LOCKOUT_MULTIPLIER: u32 = 8;

/// Limits for a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Failures inside `window` that trigger a lockout.
    pub max_attempts: u32,
    /// Base lockout length.
    pub lockout: Duration,
    /// Window in which failures are counted.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::from_secs(300),
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct KeyState {
    failures: Vec<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

/// Time from `earlier` to `later`; a clock that went backwards counts as
/// no time at all.
fn elapsed(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

impl KeyState {
    fn lockout_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| elapsed(now, until))
    }

    fn recent_failures(&self, now: DateTime<Utc>, window: Duration) -> u32 {
        self.failures
            .iter()
            .filter(|t| elapsed(**t, now) < window)
            .count() as u32
    }

    fn clear(&mut self) {
        self.failures.clear();
        self.locked_until = None;
    }
}

fn whole_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(format!("Rate limit database error: {}", e))
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

fn load_state(conn: &Connection, key: &str) -> rusqlite::Result<KeyState> {
    let mut stmt =
        conn.prepare("SELECT failed_at FROM unlock_failures WHERE key = ?1 ORDER BY failed_at")?;
    let failures = stmt
        .query_map([key], |row| from_millis(row.get(0)?))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let locked_until = conn
        .query_row(
            "SELECT locked_until FROM unlock_lockouts WHERE key = ?1",
            [key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .map(from_millis)
        .transpose()?;

    Ok(KeyState {
        failures,
        locked_until,
    })
}

fn save_state(conn: &Connection, key: &str, state: &KeyState) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM unlock_failures WHERE key = ?1", [key])?;
    for failed_at in &state.failures {
        conn.execute(
            "INSERT INTO unlock_failures (key, failed_at) VALUES (?1, ?2)",
            params![key, failed_at.timestamp_millis()],
        )?;
    }

    match state.locked_until {
        Some(until) => conn.execute(
            "INSERT OR REPLACE INTO unlock_lockouts (key, locked_until) VALUES (?1, ?2)",
            params![key, until.timestamp_millis()],
        )?,
        None => conn.execute("DELETE FROM unlock_lockouts WHERE key = ?1", [key])?,
    };
    Ok(())
}

enum Store {
    Memory(Mutex<HashMap<String, KeyState>>),
    Sqlite(Mutex<Connection>),
}

impl Store {
    /// Run `f` on the state of `key` and keep the result.
    ///
    /// SQLite errors are logged and the key is treated as having no
    /// history, so a broken database never locks the user out for good.
    fn update<T>(&self, key: &str, f: impl FnOnce(&mut KeyState) -> T) -> T {
        match self {
            Store::Memory(states) => {
                let mut states = states.lock().unwrap_or_else(PoisonError::into_inner);
                f(states.entry(key.to_string()).or_default())
            }
            Store::Sqlite(conn) => {
                let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
                let tx = match conn.transaction() {
                    Ok(tx) => tx,
                    Err(e) => {
                        warn!(key, error = %e, "Failed to open rate limit transaction");
                        return f(&mut KeyState::default());
                    }
                };

                let mut state = load_state(&tx, key).unwrap_or_else(|e| {
                    warn!(key, error = %e, "Failed to load rate limit state");
                    KeyState::default()
                });
                let before = state.clone();
                let out = f(&mut state);

                if state != before {
                    let saved = save_state(&tx, key, &state);
                    if let Err(e) = saved.and_then(|()| tx.commit()) {
                        warn!(key, error = %e, "Failed to save rate limit state");
                    }
                }
                out
            }
        }
    }
}

/// Per-key failure counter with escalating lockouts.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Store,
}

impl RateLimiter {
    /// An in-memory limiter. Its state ends with the process.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            store: Store::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// A limiter that keeps its state in the SQLite database at `db_path`.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>, config: RateLimitConfig) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS unlock_failures (
                key TEXT NOT NULL,
                failed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_unlock_failures_key ON unlock_failures(key);
            CREATE TABLE IF NOT EXISTS unlock_lockouts (
                key TEXT PRIMARY KEY,
                locked_until INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;

        debug!("Rate limit store opened");
        Ok(Self {
            config,
            store: Store::Sqlite(Mutex::new(conn)),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check whether `key` may attempt now.
    ///
    /// Returns `Err(seconds)` with the remaining lockout while locked out.
    pub fn check(&self, key: &str) -> std::result::Result<(), u64> {
        let now = Utc::now();
        match self.store.update(key, |s| s.lockout_remaining(now)) {
            Some(remaining) => Err(whole_secs(remaining)),
            None => Ok(()),
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns `Err(seconds)` if this failure started a lockout. Every
    /// failure past the limit inside the window lengthens the lockout by
    /// another base period, up to eight periods.
    pub fn record_failure(&self, key: &str) -> std::result::Result<(), u64> {
        let now = Utc::now();
        let config = &self.config;

        self.store.update(key, |state| {
            state.failures.push(now);
            state.failures.retain(|t| elapsed(*t, now) < config.window);

            let recent = state.recent_failures(now, config.window);
            if recent < config.max_attempts {
                return Ok(());
            }

            let multiplier = (recent - config.max_attempts + 1).min(MAX_LOCKOUT_MULTIPLIER);
            let lockout = config.lockout * multiplier;
            let until = chrono::Duration::from_std(lockout)
                .ok()
                .and_then(|d| now.checked_add_signed(d));
            state.locked_until = Some(until.unwrap_or(DateTime::<Utc>::MAX_UTC));

            warn!(key, lockout_secs = lockout.as_secs(), "Too many failed attempts");
            Err(lockout.as_secs())
        })
    }

    /// Forget all failures for `key`.
    pub fn record_success(&self, key: &str) {
        self.store.update(key, KeyState::clear);
    }

    /// Failures left before a lockout.
    pub fn remaining_attempts(&self, key: &str) -> u32 {
        let now = Utc::now();
        let recent = self
            .store
            .update(key, |s| s.recent_failures(now, self.config.window));
        self.config.max_attempts.saturating_sub(recent)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
