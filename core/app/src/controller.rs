//! Vault session controller.
//!
//! Owns the lock state of the vault and gates every operation on its
//! contents. State changes are published on a `watch` channel so views can
//! react to them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use envsync_common::{Error, Result, SecretString};
use envsync_storage::LocalProvider;
use envsync_vault::{
    dotenv, Environment, EnvironmentType, Project, SearchHit, Variable, VaultDocument,
    VaultManager, VaultSession,
};

use crate::audit::{AuditEvent, AuditLog};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::settings::Settings;

/// Minimum master password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

const UNLOCK_LIMIT_KEY: &str = "vault_unlock";

/// Audit target of an environment: `project/environment`.
fn environment_path(doc: &VaultDocument, environment_id: &Uuid) -> String {
    doc.environment(environment_id)
        .ok()
        .and_then(|env| {
            doc.project(&env.project_id)
                .ok()
                .map(|project| format!("{}/{}", project.name, env.name))
        })
        .unwrap_or_else(|| environment_id.to_string())
}

/// Audit target of a variable: `project/environment/KEY`.
fn variable_path(doc: &VaultDocument, variable: &Variable) -> String {
    format!("{}/{}", environment_path(doc, &variable.environment_id), variable.key)
}

/// Interface the lock view depends on.
#[async_trait]
pub trait SessionController: Send + Sync {
    /// Whether a vault exists.
    fn is_initialized(&self) -> bool;

    /// Whether the vault is currently unlocked.
    fn is_unlocked(&self) -> bool;

    /// Last operation error, if any.
    fn error(&self) -> Option<String>;

    /// Create the vault. Returns `true` on success.
    async fn initialize(&self, password: &str) -> bool;

    /// Unlock the vault. Returns `true` on success.
    async fn unlock(&self, password: &str) -> bool;

    /// Lock the vault.
    async fn lock(&self);
}

/// Lifecycle phase of the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultPhase {
    Uninitialized,
    Locked,
    Unlocked,
}

/// Observable controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: VaultPhase,
    pub error: Option<String>,
}

/// Status report for callers.
#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub is_initialized: bool,
    pub is_unlocked: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Tunables for a [`VaultController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Inactivity timeout; `None` disables auto-lock.
    pub auto_lock: Option<Duration>,
    pub rate_limit: RateLimitConfig,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            auto_lock: Some(Duration::from_secs(300)),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Clone, Copy)]
struct Activity {
    at: Instant,
    wall: DateTime<Utc>,
}

/// The vault session controller.
pub struct VaultController {
    manager: VaultManager,
    state: watch::Sender<SessionSnapshot>,
    session: RwLock<Option<VaultSession>>,
    op_lock: AsyncMutex<()>,
    limiter: RateLimiter,
    auto_lock: Option<Duration>,
    activity: Mutex<Option<Activity>>,
    audit: Option<AuditLog>,
}

impl VaultController {
    /// Create a controller over `manager`, probing storage for an existing
    /// vault.
    pub async fn new(manager: VaultManager, options: ControllerOptions) -> Result<Self> {
        let phase = if manager.vault_exists().await? {
            VaultPhase::Locked
        } else {
            VaultPhase::Uninitialized
        };
        let (state, _) = watch::channel(SessionSnapshot { phase, error: None });

        Ok(Self {
            manager,
            state,
            session: RwLock::new(None),
            op_lock: AsyncMutex::new(()),
            limiter: RateLimiter::new(options.rate_limit),
            auto_lock: options.auto_lock,
            activity: Mutex::new(None),
            audit: None,
        })
    }

    /// Record security events to `log`.
    pub fn with_audit(mut self, log: AuditLog) -> Self {
        self.audit = Some(log);
        self
    }

    /// Limit unlock attempts with `limiter` instead of the in-memory one
    /// built from the options.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Build a controller over the local data directory. The audit log and
    /// the unlock failure history live in `audit.db` next to the vault
    /// files, so a lockout holds across runs.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = Arc::new(LocalProvider::new(&settings.data_dir)?);
        let manager = VaultManager::new(provider, settings.kdf_params.clone());
        let options = settings.controller_options();
        let audit = AuditLog::open(settings.audit_db_path())?;
        let limiter = RateLimiter::open(settings.audit_db_path(), options.rate_limit.clone())?;

        Ok(Self::new(manager, options)
            .await?
            .with_audit(audit)
            .with_rate_limiter(limiter))
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    /// Watch lifecycle phase and error changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> VaultStatus {
        let snapshot = self.snapshot();
        VaultStatus {
            is_initialized: snapshot.phase != VaultPhase::Uninitialized,
            is_unlocked: snapshot.phase == VaultPhase::Unlocked,
            last_activity: self.last_activity().map(|a| a.wall),
        }
    }

    fn set_phase(&self, phase: VaultPhase) {
        self.state.send_modify(|s| s.phase = phase);
    }

    fn set_error(&self, error: Option<String>) {
        self.state.send_modify(|s| s.error = error);
    }

    fn settle<T>(&self, op: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.set_error(None),
            Err(e) => {
                warn!(op, error = %e, "Vault operation failed");
                self.set_error(Some(e.to_string()));
            }
        }
        result
    }

    fn audit(&self, event: AuditEvent, target: Option<&str>, details: Option<&str>) {
        if let Some(log) = &self.audit {
            if let Err(e) = log.record(event, target, details) {
                warn!(event = event.as_str(), error = %e, "Failed to write audit entry");
            }
        }
    }

    // ========== Activity and auto-lock ==========

    fn last_activity(&self) -> Option<Activity> {
        *self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record user activity, postponing auto-lock.
    pub fn touch(&self) {
        *self.activity.lock().unwrap_or_else(PoisonError::into_inner) = Some(Activity {
            at: Instant::now(),
            wall: Utc::now(),
        });
    }

    fn idle_expired(&self, timeout: Duration) -> bool {
        self.last_activity()
            .map(|a| a.at.elapsed() > timeout)
            .unwrap_or(false)
    }

    /// Lock the vault if it has been idle longer than the auto-lock timeout.
    ///
    /// Returns whether the vault was locked by this call.
    pub async fn check_auto_lock(&self) -> bool {
        let Some(timeout) = self.auto_lock else {
            return false;
        };
        if !self.is_unlocked() || !self.idle_expired(timeout) {
            return false;
        }

        let _op = self.op_lock.lock().await;
        if !self.is_unlocked() || !self.idle_expired(timeout) {
            return false;
        }

        self.close_session().await;
        self.audit(AuditEvent::VaultAutoLocked, None, None);
        info!(timeout_secs = timeout.as_secs(), "Vault auto-locked after inactivity");
        true
    }

    /// Run [`VaultController::check_auto_lock`] every `interval` until the
    /// controller is dropped.
    pub fn spawn_auto_lock(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.check_auto_lock().await;
            }
        })
    }

    async fn close_session(&self) -> bool {
        let closed = match self.session.write().await.take() {
            Some(mut session) => {
                session.lock();
                true
            }
            None => false,
        };
        if closed {
            self.set_phase(VaultPhase::Locked);
        }
        closed
    }

    // ========== Lifecycle ==========

    async fn try_initialize(&self, password: &str) -> Result<()> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let session = self.manager.create_vault(password).await?;
        *self.session.write().await = Some(session);
        self.touch();
        self.set_phase(VaultPhase::Unlocked);

        self.audit(AuditEvent::VaultInitialized, None, None);
        info!("Vault initialized");
        Ok(())
    }

    async fn try_unlock(&self, password: &str) -> Result<()> {
        if self.session.read().await.is_some() {
            debug!("Unlock requested on an unlocked vault");
            return Ok(());
        }
        if !self.manager.vault_exists().await? {
            return Err(Error::NotInitialized);
        }
        if let Err(retry_after_secs) = self.limiter.check(UNLOCK_LIMIT_KEY) {
            return Err(Error::RateLimited { retry_after_secs });
        }

        match self.manager.open_vault(password).await {
            Ok(session) => {
                self.limiter.record_success(UNLOCK_LIMIT_KEY);
                *self.session.write().await = Some(session);
                self.touch();
                self.set_phase(VaultPhase::Unlocked);

                self.audit(AuditEvent::VaultUnlocked, None, None);
                info!("Vault unlocked");
                Ok(())
            }
            Err(Error::InvalidPassword) => {
                let lockout = self.limiter.record_failure(UNLOCK_LIMIT_KEY).err();
                let details = lockout.map(|secs| format!("lockout_secs={}", secs));
                self.audit(AuditEvent::UnlockFailed, None, details.as_deref());
                Err(Error::InvalidPassword)
            }
            Err(e) => Err(e),
        }
    }

    /// Change the master password.
    ///
    /// Only the wrapped data key is rewritten; the vault document is left
    /// as is.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let result = self.try_change_password(old_password, new_password).await;
        self.settle("change_password", result)
    }

    async fn try_change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(Error::VaultLocked)?;
        self.manager
            .change_password(session, old_password, new_password)
            .await?;
        drop(guard);

        self.touch();
        self.audit(AuditEvent::PasswordChanged, None, None);
        Ok(())
    }

    // ========== Document access ==========

    async fn read<T>(&self, f: impl FnOnce(&VaultDocument) -> Result<T>) -> Result<T> {
        self.check_auto_lock().await;

        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(Error::VaultLocked)?;
        let out = f(session.document()?)?;
        drop(guard);

        self.touch();
        Ok(out)
    }

    /// Apply `f` to a copy of the document, persist it, then swap it in.
    async fn mutate<T>(&self, f: impl FnOnce(&mut VaultDocument) -> Result<T>) -> Result<T> {
        self.check_auto_lock().await;

        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(Error::VaultLocked)?;

        let mut document = session.document()?.clone();
        let out = f(&mut document)?;
        self.manager.save_document(session, &document).await?;
        session.replace_document(document)?;
        drop(guard);

        self.touch();
        Ok(out)
    }

    // ========== Projects ==========

    pub async fn create_project(&self, name: &str, description: Option<&str>) -> Result<Project> {
        let project = self
            .mutate(|doc| doc.create_project(name, description))
            .await?;
        self.audit(AuditEvent::ProjectCreated, Some(&project.name), None);
        Ok(project)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.read(|doc| Ok(doc.projects())).await
    }

    /// Get a project by id or name.
    pub async fn get_project(&self, id_or_name: &str) -> Result<Project> {
        self.read(|doc| doc.find_project(id_or_name).cloned()).await
    }

    pub async fn update_project(
        &self,
        id: &Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let project = self
            .mutate(|doc| doc.update_project(id, name, description))
            .await?;
        self.audit(AuditEvent::ProjectUpdated, Some(&project.name), None);
        Ok(project)
    }

    /// Delete a project with its environments and variables.
    pub async fn delete_project(&self, id: &Uuid) -> Result<()> {
        let project = self.mutate(|doc| doc.delete_project(id)).await?;
        self.audit(AuditEvent::ProjectDeleted, Some(&project.name), None);
        Ok(())
    }

    // ========== Environments ==========

    pub async fn create_environment(
        &self,
        project_id: &Uuid,
        name: &str,
        env_type: EnvironmentType,
    ) -> Result<Environment> {
        let (environment, target) = self
            .mutate(|doc| {
                let environment = doc.create_environment(project_id, name, env_type)?;
                let target = environment_path(doc, &environment.id);
                Ok((environment, target))
            })
            .await?;
        self.audit(AuditEvent::EnvironmentCreated, Some(&target), None);
        Ok(environment)
    }

    pub async fn list_environments(&self, project_id: &Uuid) -> Result<Vec<Environment>> {
        self.read(|doc| doc.environments(project_id)).await
    }

    pub async fn get_environment(&self, id: &Uuid) -> Result<Environment> {
        self.read(|doc| doc.environment(id).cloned()).await
    }

    /// Find an environment by project and environment id or name.
    pub async fn resolve_environment(&self, project: &str, environment: &str) -> Result<Environment> {
        self.read(|doc| doc.find_environment(project, environment).cloned())
            .await
    }

    pub async fn delete_environment(&self, id: &Uuid) -> Result<()> {
        let target = self
            .mutate(|doc| {
                let target = environment_path(doc, id);
                doc.delete_environment(id)?;
                Ok(target)
            })
            .await?;
        self.audit(AuditEvent::EnvironmentDeleted, Some(&target), None);
        Ok(())
    }

    // ========== Variables ==========


    pub async fn create_variable(
        &self,
        environment_id: &Uuid,
        key: &str,
        value: SecretString,
        is_secret: bool,
    ) -> Result<Variable> {
        let (variable, target) = self
            .mutate(|doc| {
                let variable = doc.create_variable(environment_id, key, value, is_secret)?;
                let target = variable_path(doc, &variable);
                Ok((variable, target))
            })
            .await?;
        self.audit(AuditEvent::VariableWritten, Some(&target), None);
        Ok(variable)
    }

    pub async fn list_variables(&self, environment_id: &Uuid) -> Result<Vec<Variable>> {
        self.read(|doc| doc.variables(environment_id)).await
    }

    pub async fn get_variable(&self, id: &Uuid) -> Result<Variable> {
        self.read(|doc| doc.variable(id).cloned()).await
    }

    pub async fn get_variable_by_key(&self, environment_id: &Uuid, key: &str) -> Result<Variable> {
        self.read(|doc| doc.variable_by_key(environment_id, key).cloned())
            .await
    }

    pub async fn update_variable(
        &self,
        id: &Uuid,
        key: &str,
        value: SecretString,
        is_secret: bool,
    ) -> Result<Variable> {
        let (variable, target) = self
            .mutate(|doc| {
                let variable = doc.update_variable(id, key, value, is_secret)?;
                let target = variable_path(doc, &variable);
                Ok((variable, target))
            })
            .await?;
        self.audit(AuditEvent::VariableWritten, Some(&target), None);
        Ok(variable)
    }

    /// Create or overwrite the variable `key`.
    pub async fn set_variable(
        &self,
        environment_id: &Uuid,
        key: &str,
        value: SecretString,
        is_secret: bool,
    ) -> Result<Variable> {
        let (variable, target) = self
            .mutate(|doc| {
                let variable = doc.set_variable(environment_id, key, value, is_secret)?;
                let target = variable_path(doc, &variable);
                Ok((variable, target))
            })
            .await?;
        self.audit(AuditEvent::VariableWritten, Some(&target), None);
        Ok(variable)
    }

    pub async fn delete_variable(&self, id: &Uuid) -> Result<()> {
        let target = self
            .mutate(|doc| {
                let target = variable_path(doc, doc.variable(id)?);
                doc.delete_variable(id)?;
                Ok(target)
            })
            .await?;
        self.audit(AuditEvent::VariableDeleted, Some(&target), None);
        Ok(())
    }

    /// Variables whose key contains `query`, ignoring case.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.read(|doc| Ok(doc.search(query))).await
    }

    // ========== .env ==========

    /// Render an environment as `.env` text.
    pub async fn export_env(&self, environment_id: &Uuid) -> Result<String> {
        let (text, target) = self
            .read(|doc| {
                let variables = doc.variables(environment_id)?;
                let text = dotenv::render(
                    variables.iter().map(|v| (v.key.as_str(), v.value.expose())),
                );
                Ok((text, environment_path(doc, environment_id)))
            })
            .await?;
        self.audit(AuditEvent::EnvironmentExported, Some(&target), None);
        Ok(text)
    }

    /// Upsert every variable in `.env` text into an environment, marking
    /// them secret. Returns the number of variables written.
    pub async fn import_env(&self, environment_id: &Uuid, content: &str) -> Result<usize> {
        let pairs = dotenv::parse(content);
        let (count, target) = self
            .mutate(|doc| {
                doc.environment(environment_id)?;
                for (key, value) in &pairs {
                    doc.set_variable(environment_id, key, SecretString::new(value.as_str()), true)?;
                }
                Ok((pairs.len(), environment_path(doc, environment_id)))
            })
            .await?;

        self.audit(
            AuditEvent::EnvironmentImported,
            Some(&target),
            Some(&format!("count={}", count)),
        );
        info!(environment_id = %environment_id, count, "Imported .env");
        Ok(count)
    }
}

#[async_trait]
impl SessionController for VaultController {
    fn is_initialized(&self) -> bool {
        self.state.borrow().phase != VaultPhase::Uninitialized
    }

    fn is_unlocked(&self) -> bool {
        self.state.borrow().phase == VaultPhase::Unlocked
    }

    fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    async fn initialize(&self, password: &str) -> bool {
        let _op = self.op_lock.lock().await;
        let result = self.try_initialize(password).await;
        self.settle("initialize", result).is_ok()
    }

    async fn unlock(&self, password: &str) -> bool {
        let _op = self.op_lock.lock().await;
        let result = self.try_unlock(password).await;
        self.settle("unlock", result).is_ok()
    }

    async fn lock(&self) {
        let _op = self.op_lock.lock().await;
        if self.close_session().await {
            self.set_error(None);
            self.audit(AuditEvent::VaultLocked, None, None);
            info!("Vault locked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsync_crypto::KdfParams;
    use envsync_storage::{MemoryProvider, StorageProvider};
    use envsync_vault::DATA_FILENAME;
    use tempfile::TempDir;

    const PASSWORD: &str = "correct-horse";

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    async fn controller_with(options: ControllerOptions) -> (VaultController, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        let manager = VaultManager::new(provider.clone(), fast_params());
        let controller = VaultController::new(manager, options)
            .await
            .unwrap()
            .with_audit(AuditLog::in_memory().unwrap());
        (controller, provider)
    }

    async fn unlocked() -> (VaultController, Arc<MemoryProvider>) {
        let (controller, provider) = controller_with(ControllerOptions::default()).await;
        assert!(controller.initialize(PASSWORD).await);
        (controller, provider)
    }

    #[tokio::test]
    async fn test_initialize_unlocks() {
        let (controller, _) = controller_with(ControllerOptions::default()).await;
        assert!(!controller.is_initialized());
        assert!(!controller.is_unlocked());

        assert!(controller.initialize(PASSWORD).await);
        assert!(controller.is_initialized());
        assert!(controller.is_unlocked());
        assert_eq!(controller.error(), None);
        assert!(controller.status().last_activity.is_some());
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let (controller, _) = unlocked().await;
        controller.lock().await;

        assert!(!controller.initialize("another-password").await);
        assert_eq!(controller.error().as_deref(), Some("Vault already initialized"));
        assert!(!controller.is_unlocked());
    }

    #[tokio::test]
    async fn test_unlock_uninitialized() {
        let (controller, _) = controller_with(ControllerOptions::default()).await;
        assert!(!controller.unlock(PASSWORD).await);
        assert_eq!(controller.error().as_deref(), Some("Vault not initialized"));
    }

    #[tokio::test]
    async fn test_lock_unlock_cycle() {
        let (controller, _) = unlocked().await;
        let mut rx = controller.subscribe();

        controller.lock().await;
        assert!(!controller.is_unlocked());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().phase, VaultPhase::Locked);
        assert!(matches!(controller.list_projects().await, Err(Error::VaultLocked)));

        assert!(!controller.unlock("wrong-password").await);
        assert_eq!(controller.error().as_deref(), Some("Invalid password"));
        assert!(!controller.is_unlocked());

        assert!(controller.unlock(PASSWORD).await);
        assert_eq!(controller.error(), None);
        assert!(controller.is_unlocked());

        // Unlocking again is a no-op success.
        assert!(controller.unlock("irrelevant").await);
    }

    #[tokio::test]
    async fn test_lockout_blocks_correct_password() {
        let options = ControllerOptions {
            rate_limit: RateLimitConfig {
                max_attempts: 3,
                ..RateLimitConfig::default()
            },
            ..ControllerOptions::default()
        };
        let (controller, _) = controller_with(options).await;
        assert!(controller.initialize(PASSWORD).await);
        controller.lock().await;

        for _ in 0..3 {
            assert!(!controller.unlock("wrong-password").await);
        }
        assert!(!controller.unlock(PASSWORD).await);
        assert!(controller
            .error()
            .unwrap()
            .starts_with("Too many failed attempts"));
    }

    #[tokio::test]
    async fn test_lockout_holds_across_controllers() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            kdf_params: fast_params(),
            max_unlock_attempts: 3,
            ..Settings::default()
        };

        let controller = VaultController::from_settings(&settings).await.unwrap();
        assert!(controller.initialize(PASSWORD).await);
        drop(controller);

        for _ in 0..3 {
            let controller = VaultController::from_settings(&settings).await.unwrap();
            assert!(!controller.unlock("wrong-password").await);
        }

        let controller = VaultController::from_settings(&settings).await.unwrap();
        assert!(!controller.unlock(PASSWORD).await);
        assert!(!controller.is_unlocked());
        assert!(controller
            .error()
            .unwrap()
            .starts_with("Too many failed attempts"));
    }

    #[tokio::test]
    async fn test_failures_below_limit_reset_after_unlock_across_controllers() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            kdf_params: fast_params(),
            max_unlock_attempts: 3,
            ..Settings::default()
        };

        let controller = VaultController::from_settings(&settings).await.unwrap();
        assert!(controller.initialize(PASSWORD).await);
        drop(controller);

        for _ in 0..2 {
            let controller = VaultController::from_settings(&settings).await.unwrap();
            assert!(!controller.unlock("wrong-password").await);
        }
        let controller = VaultController::from_settings(&settings).await.unwrap();
        assert!(controller.unlock(PASSWORD).await);
        drop(controller);

        for _ in 0..2 {
            let controller = VaultController::from_settings(&settings).await.unwrap();
            assert!(!controller.unlock("wrong-password").await);
        }
        let controller = VaultController::from_settings(&settings).await.unwrap();
        assert!(controller.unlock(PASSWORD).await);
    }

    #[tokio::test]
    async fn test_existing_vault_starts_locked() {
        let provider = Arc::new(MemoryProvider::new());
        {
            let manager = VaultManager::new(provider.clone(), fast_params());
            let controller = VaultController::new(manager, ControllerOptions::default())
                .await
                .unwrap();
            assert!(controller.initialize(PASSWORD).await);
        }

        let manager = VaultManager::new(provider, fast_params());
        let controller = VaultController::new(manager, ControllerOptions::default())
            .await
            .unwrap();
        assert!(controller.is_initialized());
        assert!(!controller.is_unlocked());
    }

    #[tokio::test]
    async fn test_project_crud_persists() {
        let (controller, _) = unlocked().await;

        let project = controller.create_project("api", Some("backend")).await.unwrap();
        let renamed = controller
            .update_project(&project.id, "api-gateway", None)
            .await
            .unwrap();
        assert_eq!(renamed.name, "api-gateway");

        controller.lock().await;
        assert!(controller.unlock(PASSWORD).await);

        let projects = controller.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(controller.get_project("API-GATEWAY").await.unwrap().id, project.id);
        assert_eq!(controller.list_environments(&project.id).await.unwrap().len(), 3);

        controller.delete_project(&project.id).await.unwrap();
        assert!(controller.list_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_memory_unchanged() {
        let (controller, _) = unlocked().await;
        controller.create_project("api", None).await.unwrap();

        assert!(controller.create_project("API", None).await.is_err());
        assert_eq!(controller.list_projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_variables_and_search() {
        let (controller, _) = unlocked().await;
        controller.create_project("api", None).await.unwrap();
        let dev = controller
            .resolve_environment("api", "development")
            .await
            .unwrap();

        let var = controller
            .create_variable(&dev.id, "DATABASE_URL", "postgres://db".into(), true)
            .await
            .unwrap();
        controller
            .set_variable(&dev.id, "DATABASE_URL", "postgres://other".into(), true)
            .await
            .unwrap();
        assert_eq!(
            controller.get_variable(&var.id).await.unwrap().value.expose(),
            "postgres://other"
        );

        let hits = controller.search("database").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].environment.id, dev.id);

        controller.delete_variable(&var.id).await.unwrap();
        assert!(controller.list_variables(&dev.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_import() {
        let (controller, _) = unlocked().await;
        controller.create_project("api", None).await.unwrap();
        let dev = controller.resolve_environment("api", "Development").await.unwrap();
        let prod = controller.resolve_environment("api", "Production").await.unwrap();

        let imported = controller
            .import_env(&dev.id, "# comment\nB=two words\nexport A=1\nbad line\n")
            .await
            .unwrap();
        assert_eq!(imported, 2);

        let text = controller.export_env(&dev.id).await.unwrap();
        assert_eq!(text, "A=1\nB=\"two words\"\n");

        assert_eq!(controller.import_env(&prod.id, &text).await.unwrap(), 2);
        let vars = controller.list_variables(&prod.id).await.unwrap();
        assert!(vars.iter().all(|v| v.is_secret));
        assert_eq!(vars[1].value.expose(), "two words");
    }

    #[tokio::test]
    async fn test_no_plaintext_on_disk() {
        let (controller, provider) = unlocked().await;
        controller.create_project("api", None).await.unwrap();
        let dev = controller.resolve_environment("api", "Development").await.unwrap();
        controller
            .set_variable(&dev.id, "TOKEN", "sk_live_marker_value".into(), true)
            .await
            .unwrap();

        let bytes = provider.download(DATA_FILENAME).await.unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("sk_live_marker_value"));
        assert!(!String::from_utf8_lossy(&bytes).contains("TOKEN"));
    }

    #[tokio::test]
    async fn test_change_password() {
        let (controller, _) = unlocked().await;
        controller.create_project("api", None).await.unwrap();

        assert!(controller.change_password(PASSWORD, "short").await.is_err());
        assert!(controller.error().unwrap().contains("at least 8"));
        assert!(matches!(
            controller.change_password("wrong-password", "new-password-1").await,
            Err(Error::InvalidPassword)
        ));

        controller
            .change_password(PASSWORD, "new-password-1")
            .await
            .unwrap();
        assert_eq!(controller.error(), None);
        controller.lock().await;

        assert!(!controller.unlock(PASSWORD).await);
        assert!(controller.unlock("new-password-1").await);
        assert_eq!(controller.list_projects().await.unwrap()[0].name, "api");
    }

    #[tokio::test]
    async fn test_change_password_requires_unlock() {
        let (controller, _) = unlocked().await;
        controller.lock().await;
        assert!(matches!(
            controller.change_password(PASSWORD, "new-password-1").await,
            Err(Error::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_auto_lock_after_timeout() {
        let options = ControllerOptions {
            auto_lock: Some(Duration::from_millis(200)),
            ..ControllerOptions::default()
        };
        let (controller, _) = controller_with(options).await;
        assert!(controller.initialize(PASSWORD).await);

        assert!(!controller.check_auto_lock().await);
        assert!(controller.is_unlocked());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(controller.check_auto_lock().await);
        assert!(!controller.is_unlocked());
        assert!(!controller.check_auto_lock().await);
    }

    #[tokio::test]
    async fn test_expired_session_locks_before_use() {
        let options = ControllerOptions {
            auto_lock: Some(Duration::from_millis(100)),
            ..ControllerOptions::default()
        };
        let (controller, _) = controller_with(options).await;
        assert!(controller.initialize(PASSWORD).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(controller.list_projects().await, Err(Error::VaultLocked)));
    }

    #[tokio::test]
    async fn test_auto_lock_disabled() {
        let options = ControllerOptions {
            auto_lock: None,
            ..ControllerOptions::default()
        };
        let (controller, _) = controller_with(options).await;
        assert!(controller.initialize(PASSWORD).await);
        assert!(!controller.check_auto_lock().await);
    }

    #[tokio::test]
    async fn test_spawned_auto_lock_task() {
        let options = ControllerOptions {
            auto_lock: Some(Duration::from_millis(50)),
            ..ControllerOptions::default()
        };
        let (controller, _) = controller_with(options).await;
        let controller = Arc::new(controller);
        assert!(controller.initialize(PASSWORD).await);

        let handle = controller.spawn_auto_lock(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!controller.is_unlocked());
        handle.abort();
    }

    #[tokio::test]
    async fn test_audit_trail() {
        let (controller, _) = unlocked().await;
        controller.create_project("api", None).await.unwrap();
        controller.lock().await;
        assert!(!controller.unlock("wrong-password").await);

        let log = controller.audit_log().unwrap();
        let events: Vec<_> = log
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(
            events,
            vec!["unlock_failed", "vault_locked", "project_created", "vault_initialized"]
        );
        assert!(log.verify_chain().unwrap());
    }

    #[tokio::test]
    async fn test_audit_targets_are_paths() {
        let (controller, _) = unlocked().await;
        let project = controller.create_project("api", None).await.unwrap();
        let env = controller.resolve_environment("api", "Development").await.unwrap();
        let variable = controller
            .set_variable(&env.id, "DB_URL", SecretString::new("postgres://x"), true)
            .await
            .unwrap();
        controller.export_env(&env.id).await.unwrap();
        controller.import_env(&env.id, "PORT=8080\n").await.unwrap();
        controller.delete_variable(&variable.id).await.unwrap();
        let preview = controller
            .create_environment(&project.id, "preview", EnvironmentType::parse("preview"))
            .await
            .unwrap();
        controller.delete_environment(&preview.id).await.unwrap();
        controller.delete_project(&project.id).await.unwrap();

        let entries = controller.audit_log().unwrap().recent(20).unwrap();
        let targets: Vec<_> = entries
            .iter()
            .rev()
            .map(|e| (e.event.as_str(), e.target.as_deref()))
            .collect();
        assert_eq!(
            targets,
            vec![
                ("vault_initialized", None),
                ("project_created", Some("api")),
                ("variable_written", Some("api/Development/DB_URL")),
                ("environment_exported", Some("api/Development")),
                ("environment_imported", Some("api/Development")),
                ("variable_deleted", Some("api/Development/DB_URL")),
                ("environment_created", Some("api/preview")),
                ("environment_deleted", Some("api/preview")),
                ("project_deleted", Some("api")),
            ]
        );
        assert!(entries
            .iter()
            .all(|e| !e.details.as_deref().unwrap_or("").contains("postgres")));
    }
}
