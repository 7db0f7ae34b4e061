//! View model for the vault lock screen.
//!
//! The view shows a setup form when no vault exists and an unlock form
//! otherwise. It validates locally and delegates to a
//! [`SessionController`]; it never sees decrypted vault contents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::debug;
use zeroize::Zeroizing;

use crate::controller::{SessionController, MIN_PASSWORD_LENGTH};

pub const PASSWORD_TOO_SHORT: &str = "Password must be at least 8 characters";
pub const PASSWORDS_DO_NOT_MATCH: &str = "Passwords do not match";
pub const CREATE_FAILED: &str = "Failed to create vault";
pub const PASSWORD_REQUIRED: &str = "Please enter your password";
pub const INVALID_PASSWORD: &str = "Invalid password";

/// Check a new master password and its confirmation.
///
/// Returns the message to show when the pair is not acceptable.
pub fn validate_new_password(password: &str, confirm_password: &str) -> Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PASSWORD_TOO_SHORT);
    }
    if password != confirm_password {
        return Err(PASSWORDS_DO_NOT_MATCH);
    }
    Ok(())
}

/// Which form the lock screen shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// No vault yet: choose and confirm a master password.
    Setup,
    /// Vault exists but is locked.
    Unlock,
}

/// Result of a form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Local validation failed; the controller was not called.
    Rejected,
    /// Another submission was in flight; nothing happened.
    Ignored,
    Succeeded,
    Failed,
}

#[derive(Default)]
struct LockForm {
    password: Zeroizing<String>,
    confirm_password: Zeroizing<String>,
}

/// Marks a submission in flight and clears loading if it is abandoned.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    loading: &'a watch::Sender<bool>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.loading.send_if_modified(|loading| std::mem::replace(loading, false));
        self.flag.store(false, Ordering::Release);
    }
}

/// Lock screen state: form fields, loading flag and error message.
pub struct LockView<C: SessionController + ?Sized> {
    controller: Arc<C>,
    form: Mutex<LockForm>,
    in_flight: AtomicBool,
    loading: watch::Sender<bool>,
    error: watch::Sender<Option<String>>,
}

impl<C: SessionController + ?Sized> LockView<C> {
    pub fn new(controller: Arc<C>) -> Self {
        let (loading, _) = watch::channel(false);
        let (error, _) = watch::channel(None);
        Self {
            controller,
            form: Mutex::new(LockForm::default()),
            in_flight: AtomicBool::new(false),
            loading,
            error,
        }
    }

    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    pub fn mode(&self) -> LockMode {
        if self.controller.is_initialized() {
            LockMode::Unlock
        } else {
            LockMode::Setup
        }
    }

    fn form(&self) -> std::sync::MutexGuard<'_, LockForm> {
        self.form.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_password(&self, value: &str) {
        self.form().password = Zeroizing::new(value.to_string());
    }

    pub fn set_confirm_password(&self, value: &str) {
        self.form().confirm_password = Zeroizing::new(value.to_string());
    }

    pub fn password(&self) -> Zeroizing<String> {
        self.form().password.clone()
    }

    pub fn confirm_password(&self) -> Zeroizing<String> {
        self.form().confirm_password.clone()
    }

    /// Whether a controller call is in progress.
    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.error.subscribe()
    }

    /// Clear both fields and the error.
    pub fn reset(&self) {
        *self.form() = LockForm::default();
        self.error.send_replace(None);
    }

    fn begin(&self) -> Option<InFlight<'_>> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Ignoring submission while another is in flight");
            return None;
        }
        self.error.send_replace(None);
        Some(InFlight {
            flag: &self.in_flight,
            loading: &self.loading,
        })
    }

    fn reject(&self, message: &str) -> SubmitOutcome {
        self.error.send_replace(Some(message.to_string()));
        SubmitOutcome::Rejected
    }

    /// Submit the form shown for the current mode.
    pub async fn submit(&self) -> SubmitOutcome {
        match self.mode() {
            LockMode::Setup => self.on_setup().await,
            LockMode::Unlock => self.on_unlock().await,
        }
    }

    /// Validate the setup form and create the vault.
    pub async fn on_setup(&self) -> SubmitOutcome {
        let Some(_in_flight) = self.begin() else {
            return SubmitOutcome::Ignored;
        };

        let password = self.password();
        if let Err(message) = validate_new_password(&password, &self.confirm_password()) {
            return self.reject(message);
        }

        self.loading.send_replace(true);
        let created = self.controller.initialize(&password).await;
        self.loading.send_replace(false);

        if created {
            SubmitOutcome::Succeeded
        } else {
            let message = self
                .controller
                .error()
                .unwrap_or_else(|| CREATE_FAILED.to_string());
            self.error.send_replace(Some(message));
            SubmitOutcome::Failed
        }
    }

    /// Validate the unlock form and unlock the vault.
    ///
    /// A failed unlock clears the password field; a successful one leaves
    /// it for the caller to tear the form down.
    pub async fn on_unlock(&self) -> SubmitOutcome {
        let Some(_in_flight) = self.begin() else {
            return SubmitOutcome::Ignored;
        };

        let password = self.password();
        if password.is_empty() {
            return self.reject(PASSWORD_REQUIRED);
        }

        self.loading.send_replace(true);
        let unlocked = self.controller.unlock(&password).await;
        self.loading.send_replace(false);

        if unlocked {
            SubmitOutcome::Succeeded
        } else {
            self.error.send_replace(Some(INVALID_PASSWORD.to_string()));
            self.form().password = Zeroizing::new(String::new());
            SubmitOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    #[derive(Default)]
    struct MockController {
        initialized: AtomicBool,
        unlocked: AtomicBool,
        accept: bool,
        error: Option<String>,
        initialize_calls: AtomicUsize,
        unlock_calls: AtomicUsize,
        loading_watch: OnceLock<watch::Receiver<bool>>,
        loading_seen: AtomicBool,
        error_watch: OnceLock<watch::Receiver<Option<String>>>,
        error_clear_during_call: AtomicBool,
    }

    impl MockController {
        fn setup(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                ..Self::default()
            })
        }

        fn locked(accept: bool) -> Arc<Self> {
            let mock = Self {
                accept,
                ..Self::default()
            };
            mock.initialized.store(true, Ordering::SeqCst);
            Arc::new(mock)
        }

        async fn call(&self) -> bool {
            if let Some(rx) = self.loading_watch.get() {
                self.loading_seen.store(*rx.borrow(), Ordering::SeqCst);
            }
            if let Some(rx) = self.error_watch.get() {
                self.error_clear_during_call
                    .store(rx.borrow().is_none(), Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            self.accept
        }
    }

    #[async_trait]
    impl SessionController for MockController {
        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }

        fn is_unlocked(&self) -> bool {
            self.unlocked.load(Ordering::SeqCst)
        }

        fn error(&self) -> Option<String> {
            self.error.clone()
        }

        async fn initialize(&self, _password: &str) -> bool {
            self.initialize_calls.fetch_add(1, Ordering::SeqCst);
            let ok = self.call().await;
            if ok {
                self.initialized.store(true, Ordering::SeqCst);
                self.unlocked.store(true, Ordering::SeqCst);
            }
            ok
        }

        async fn unlock(&self, _password: &str) -> bool {
            self.unlock_calls.fetch_add(1, Ordering::SeqCst);
            let ok = self.call().await;
            if ok {
                self.unlocked.store(true, Ordering::SeqCst);
            }
            ok
        }

        async fn lock(&self) {
            self.unlocked.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_validate_new_password() {
        assert_eq!(validate_new_password("short", "short"), Err(PASSWORD_TOO_SHORT));
        assert_eq!(
            validate_new_password("password123", "password456"),
            Err(PASSWORDS_DO_NOT_MATCH)
        );
        assert_eq!(validate_new_password("password123", "password123"), Ok(()));
    }

    #[test]
    fn test_mode_follows_initialization() {
        assert_eq!(LockView::new(MockController::setup(true)).mode(), LockMode::Setup);
        assert_eq!(LockView::new(MockController::locked(true)).mode(), LockMode::Unlock);
    }

    #[tokio::test]
    async fn test_setup_short_password_not_sent() {
        let mock = MockController::setup(true);
        let view = LockView::new(mock.clone());
        view.set_password("short");
        view.set_confirm_password("short");

        assert_eq!(view.submit().await, SubmitOutcome::Rejected);
        assert_eq!(view.error().as_deref(), Some(PASSWORD_TOO_SHORT));
        assert_eq!(mock.initialize_calls.load(Ordering::SeqCst), 0);
        assert!(!view.is_loading());
    }

    #[tokio::test]
    async fn test_setup_mismatch_not_sent() {
        let mock = MockController::setup(true);
        let view = LockView::new(mock.clone());
        view.set_password("password123");
        view.set_confirm_password("password456");

        assert_eq!(view.on_setup().await, SubmitOutcome::Rejected);
        assert_eq!(view.error().as_deref(), Some(PASSWORDS_DO_NOT_MATCH));
        assert_eq!(mock.initialize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_setup_success() {
        let mock = MockController::setup(true);
        let view = LockView::new(mock.clone());
        view.set_password("password123");
        view.set_confirm_password("password123");

        assert_eq!(view.on_setup().await, SubmitOutcome::Succeeded);
        assert_eq!(view.error(), None);
        assert_eq!(mock.initialize_calls.load(Ordering::SeqCst), 1);
        assert!(mock.is_unlocked());
    }

    #[tokio::test]
    async fn test_setup_failure_uses_controller_error() {
        let mock = Arc::new(MockController {
            error: Some("Storage error: disk full".to_string()),
            ..MockController::default()
        });
        let view = LockView::new(mock);
        view.set_password("password123");
        view.set_confirm_password("password123");

        assert_eq!(view.on_setup().await, SubmitOutcome::Failed);
        assert_eq!(view.error().as_deref(), Some("Storage error: disk full"));
    }

    #[tokio::test]
    async fn test_setup_failure_fallback_message() {
        let view = LockView::new(MockController::setup(false));
        view.set_password("password123");
        view.set_confirm_password("password123");

        assert_eq!(view.on_setup().await, SubmitOutcome::Failed);
        assert_eq!(view.error().as_deref(), Some(CREATE_FAILED));
    }

    #[tokio::test]
    async fn test_unlock_empty_not_sent() {
        let mock = MockController::locked(true);
        let view = LockView::new(mock.clone());

        assert_eq!(view.submit().await, SubmitOutcome::Rejected);
        assert_eq!(view.error().as_deref(), Some(PASSWORD_REQUIRED));
        assert_eq!(mock.unlock_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unlock_failure_clears_password() {
        let mock = MockController::locked(false);
        let view = LockView::new(mock.clone());
        view.set_password("wrong-password");

        assert_eq!(view.on_unlock().await, SubmitOutcome::Failed);
        assert_eq!(view.error().as_deref(), Some(INVALID_PASSWORD));
        assert!(view.password().is_empty());
        assert_eq!(mock.unlock_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unlock_success_keeps_password() {
        let mock = MockController::locked(true);
        let view = LockView::new(mock.clone());
        view.set_password("right-password");

        assert_eq!(view.on_unlock().await, SubmitOutcome::Succeeded);
        assert_eq!(view.password().as_str(), "right-password");
        assert_eq!(view.error(), None);
        assert!(mock.is_unlocked());
    }

    #[tokio::test]
    async fn test_error_cleared_on_next_submission() {
        let mock = MockController::locked(false);
        let view = LockView::new(mock.clone());
        view.set_password("first");
        view.on_unlock().await;
        assert!(view.error().is_some());

        mock.error_watch.set(view.subscribe_error()).unwrap();
        view.set_password("second");
        assert_eq!(view.on_unlock().await, SubmitOutcome::Failed);

        assert!(mock.error_clear_during_call.load(Ordering::SeqCst));
        assert_eq!(view.error().as_deref(), Some(INVALID_PASSWORD));
    }

    #[tokio::test]
    async fn test_loading_only_during_call() {
        let mock = MockController::locked(true);
        let view = LockView::new(mock.clone());
        mock.loading_watch.set(view.subscribe_loading()).unwrap();
        view.set_password("right-password");

        assert!(!view.is_loading());
        view.on_unlock().await;
        assert!(mock.loading_seen.load(Ordering::SeqCst));
        assert!(!view.is_loading());
    }

    #[tokio::test]
    async fn test_concurrent_submit_ignored() {
        let mock = MockController::locked(true);
        let view = LockView::new(mock.clone());
        view.set_password("right-password");

        let (first, second) = tokio::join!(view.submit(), view.submit());

        assert_eq!(first, SubmitOutcome::Succeeded);
        assert_eq!(second, SubmitOutcome::Ignored);
        assert_eq!(mock.unlock_calls.load(Ordering::SeqCst), 1);
        assert!(!view.is_loading());
    }

    #[tokio::test]
    async fn test_reset_clears_form() {
        let view = LockView::new(MockController::setup(true));
        view.set_password("abc");
        view.set_confirm_password("abc");
        view.on_setup().await;

        view.reset();
        assert!(view.password().is_empty());
        assert!(view.confirm_password().is_empty());
        assert_eq!(view.error(), None);
    }
}
