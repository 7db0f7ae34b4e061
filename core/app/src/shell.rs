//! Root view: lock screen or dashboard.

use std::sync::Arc;

use crate::controller::SessionController;
use crate::lock_view::{LockMode, LockView};

/// Screen currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Lock(LockMode),
    Dashboard,
}

/// Switches between the lock screen and the dashboard as the vault locks
/// and unlocks.
pub struct AppShell<C: SessionController + ?Sized> {
    controller: Arc<C>,
    lock_view: LockView<C>,
}

impl<C: SessionController + ?Sized> AppShell<C> {
    pub fn new(controller: Arc<C>) -> Self {
        let lock_view = LockView::new(controller.clone());
        Self {
            controller,
            lock_view,
        }
    }

    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    pub fn lock_view(&self) -> &LockView<C> {
        &self.lock_view
    }

    /// The screen for the current controller state. Reaching the dashboard
    /// tears down the lock form.
    pub fn screen(&self) -> Screen {
        if self.controller.is_unlocked() {
            self.lock_view.reset();
            Screen::Dashboard
        } else {
            Screen::Lock(self.lock_view.mode())
        }
    }

    /// Lock the vault and return to the lock screen.
    pub async fn lock(&self) -> Screen {
        self.controller.lock().await;
        self.screen()
    }
}
