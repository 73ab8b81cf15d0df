//! Handling of a rejected credential.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use kube_chat_core::{ChatContext, DurableStore, ViewStore};
use kube_chat_gateway::Credentials;
use tokio::runtime::Handle;

/// Clears the stored credential and schedules one login redirect.
pub struct SessionExpiry<S: DurableStore> {
    store: Arc<S>,
    view: Arc<ViewStore>,
    delay: Duration,
    login_path: String,
    redirect_pending: Arc<AtomicBool>,
}

impl<S: DurableStore> SessionExpiry<S> {
    #[must_use]
    pub fn new(ctx: &ChatContext, store: Arc<S>, view: Arc<ViewStore>) -> Self {
        Self {
            store,
            view,
            delay: ctx.redirect_delay(),
            login_path: ctx.login_path.clone(),
            redirect_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Drop the credential and schedule the redirect.
    ///
    /// Returns false when a redirect is already scheduled; the credential is
    /// cleared either way.
    pub fn trigger(&self) -> bool {
        if let Err(e) = Credentials::clear(&*self.store) {
            tracing::warn!("Failed to clear stored credential: {e}");
        }
        if self.redirect_pending.swap(true, Ordering::SeqCst) {
            tracing::debug!("Login redirect already scheduled");
            return false;
        }

        let view = Arc::clone(&self.view);
        let pending = Arc::clone(&self.redirect_pending);
        let path = self.login_path.clone();
        let delay = self.delay;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    pending.store(false, Ordering::SeqCst);
                    view.push_login_required(path);
                });
            }
            Err(_) => {
                pending.store(false, Ordering::SeqCst);
                view.push_login_required(path);
            }
        }
        tracing::info!(?delay, "Credential rejected; login redirect scheduled");
        true
    }

    #[must_use]
    pub fn is_redirect_pending(&self) -> bool {
        self.redirect_pending.load(Ordering::SeqCst)
    }
}
