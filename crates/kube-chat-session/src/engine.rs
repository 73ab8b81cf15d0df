//! Conversation engine.
//!
//! Owns the displayed session and its messages, and reconciles gateway
//! results against the durable store. The only suspension point is the
//! gateway call; everything else runs to completion under the UI lock, and
//! that lock is never held across an await.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use kube_chat_core::{
    ActiveSettings, ChatContext, ChatView, Clock, CommandGateway, ConfigError, ConfigStore,
    DurableStore, GatewayError, Message, MessageKind, Notice, Reply, SessionId, SystemClock,
    ViewStore,
    traits::keys,
};
use kube_chat_gateway::{ValidationError, parse_command};
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    expiry::SessionExpiry,
    naming,
    recency::RecencyGroups,
    repository::{RepositoryError, SessionExport, SessionRepository, SwitchOutcome},
    tracker::{PendingTracker, SubmissionPhase},
};

const BUSY_TEXT: &str = "当前会话正在处理请求，请稍候";

/// Engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How a submission ended.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Input rejected locally; nothing sent or stored.
    Rejected(ValidationError),
    /// The session already has a request in flight.
    Busy(SessionId),
    /// The agent answered and the reply was stored.
    Replied {
        session_id: SessionId,
        message: Message,
    },
    /// The request failed and the failure text was stored.
    Failed {
        session_id: SessionId,
        error: GatewayError,
        message: Message,
    },
    /// The session was deleted before the result arrived.
    Dropped { session_id: SessionId },
    /// The store could not record the submission.
    Aborted(EngineError),
}

struct UiState {
    current: Option<SessionId>,
    messages: Vec<Message>,
}

struct Reservation {
    session_id: SessionId,
    model: String,
    cluster: String,
    title: Option<String>,
}

enum Reserve {
    Ready(Reservation),
    Busy(SessionId),
}

fn or_default(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Orchestrates sessions, submissions and the observable view.
pub struct ConversationEngine<S: DurableStore, G: CommandGateway> {
    ctx: ChatContext,
    store: Arc<S>,
    gateway: Arc<G>,
    repository: SessionRepository<S>,
    tracker: PendingTracker,
    view: Arc<ViewStore>,
    ui: Mutex<UiState>,
    expiry: SessionExpiry<S>,
    configs: ConfigStore<S>,
    settings: RwLock<ActiveSettings>,
    clock: Arc<dyn Clock>,
    last_stamp: AtomicI64,
    notice_seq: AtomicU64,
}

impl<S: DurableStore, G: CommandGateway> ConversationEngine<S, G> {
    /// Create an engine and restore the persisted sessions.
    ///
    /// # Errors
    /// Returns error if the sessions document cannot be read.
    pub fn new(ctx: ChatContext, store: Arc<S>, gateway: Arc<G>) -> Result<Self, EngineError> {
        Self::with_clock(ctx, store, gateway, Arc::new(SystemClock))
    }

    /// Like [`ConversationEngine::new`] with an explicit clock.
    ///
    /// # Errors
    /// Returns error if the sessions document cannot be read.
    pub fn with_clock(
        ctx: ChatContext,
        store: Arc<S>,
        gateway: Arc<G>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let repository = SessionRepository::with_clock(Arc::clone(&store), Arc::clone(&clock));
        let state = repository.load()?;
        let messages = state
            .current()
            .map(|s| s.messages.clone())
            .unwrap_or_default();

        let configs = ConfigStore::with_clock(Arc::clone(&store), Arc::clone(&clock));
        let active = configs.active().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable provider configuration: {e}");
            None
        });
        let settings = ActiveSettings::resolve(&ctx, active.as_ref());

        let view = Arc::new(ViewStore::new());
        let expiry = SessionExpiry::new(&ctx, Arc::clone(&store), Arc::clone(&view));

        let engine = Self {
            ctx,
            store,
            gateway,
            repository,
            tracker: PendingTracker::new(),
            view,
            ui: Mutex::new(UiState {
                current: state.current_session_id.clone(),
                messages,
            }),
            expiry,
            configs,
            settings: RwLock::new(settings),
            clock,
            last_stamp: AtomicI64::new(0),
            notice_seq: AtomicU64::new(0),
        };
        engine.publish(&engine.lock_ui());
        tracing::info!(
            sessions = state.sessions.len(),
            current = ?state.current_session_id,
            "Conversation engine ready"
        );
        Ok(engine)
    }

    fn lock_ui(&self) -> MutexGuard<'_, UiState> {
        self.ui.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push the displayed state to view subscribers.
    fn publish(&self, ui: &UiState) {
        let current = ui.current.clone();
        let messages = ui.messages.clone();
        let is_loading = current
            .as_deref()
            .is_some_and(|id| self.tracker.is_pending(id));
        let pending = self.tracker.snapshot();
        self.view.update(move |view| {
            view.current_session_id = current;
            view.messages = messages;
            view.is_loading = is_loading;
            view.pending_by_session_id = pending;
        });
    }

    /// Timestamp strictly greater than any this engine handed out before.
    fn next_stamp(&self) -> i64 {
        let now = self.clock.now_millis();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Show a transient notice that clears itself after the notice duration.
    fn show_notice(&self, text: String) {
        let id = self.notice_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.view.update(|view| view.notice = Some(Notice { id, text }));

        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let view = Arc::clone(&self.view);
        let duration = self.ctx.notice_duration();
        handle.spawn(async move {
            tokio::time::sleep(duration).await;
            view.update(|view| {
                if view.notice.as_ref().is_some_and(|n| n.id == id) {
                    view.notice = None;
                }
            });
        });
    }

    fn auto_name(&self, session_id: &str, title: Option<&str>) {
        let Some(title) = title else {
            return;
        };
        match self.repository.rename_if_eligible(session_id, title) {
            Ok(true) => {
                tracing::debug!(session_id, title, "Named session from first message");
                self.view.push_sessions_changed();
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(session_id, "Automatic naming failed: {e}"),
        }
    }

    /// Submit user input to the displayed session.
    ///
    /// Creates a session when none is displayed. Resolves once the result is
    /// stored; callers that must stay responsive spawn it.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        tracing::debug!(phase = ?SubmissionPhase::Validating, "Validating input");
        let command = match parse_command(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("Rejected input: {e}");
                self.show_notice(e.to_string());
                return SubmitOutcome::Rejected(e);
            }
        };
        let kind = if command.explicit {
            MessageKind::Command
        } else {
            MessageKind::Chat
        };

        let reservation = match self.reserve(text.trim(), kind) {
            Ok(Reserve::Ready(reservation)) => reservation,
            Ok(Reserve::Busy(session_id)) => {
                tracing::debug!(%session_id, "Session busy; submission rejected");
                self.show_notice(BUSY_TEXT.to_string());
                return SubmitOutcome::Busy(session_id);
            }
            Err(e) => {
                tracing::error!("Failed to record submission: {e}");
                self.show_notice(e.to_string());
                return SubmitOutcome::Aborted(e);
            }
        };

        tracing::debug!(
            session_id = %reservation.session_id,
            verb = %command.verb,
            phase = ?SubmissionPhase::Dispatched,
            "Dispatching command"
        );
        let result = self
            .gateway
            .send(&command, &reservation.model, &reservation.cluster)
            .await;
        self.reconcile(reservation, kind, result)
    }

    /// Mark the target busy and store the user message.
    fn reserve(&self, content: &str, kind: MessageKind) -> Result<Reserve, EngineError> {
        let mut ui = self.lock_ui();
        let existing = match ui.current.clone() {
            Some(id) => self.repository.session(&id)?,
            None => None,
        };
        let session_id = if let Some(session) = existing {
            session.id
        } else {
            let settings = self.settings();
            let id = self
                .repository
                .create(&settings.model, &settings.cluster, None)?;
            ui.current = Some(id.clone());
            ui.messages.clear();
            self.view.push_sessions_changed();
            id
        };

        if !self.tracker.begin(&session_id) {
            return Ok(Reserve::Busy(session_id));
        }
        let message = Message::user(content, self.next_stamp(), kind);
        let session = match self.repository.append_message(&session_id, message) {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.tracker.end(&session_id);
                return Err(RepositoryError::NotFound(session_id).into());
            }
            Err(e) => {
                self.tracker.end(&session_id);
                return Err(e.into());
            }
        };

        let title = naming::title_from(content);
        self.auto_name(&session_id, title.as_deref());
        ui.messages = session.messages;
        self.publish(&ui);

        let settings = self.settings();
        Ok(Reserve::Ready(Reservation {
            session_id,
            model: or_default(session.model, &settings.model),
            cluster: or_default(session.cluster, &settings.cluster),
            title,
        }))
    }

    /// Store the gateway result against the freshest state of the target.
    fn reconcile(
        &self,
        reservation: Reservation,
        kind: MessageKind,
        result: Result<Reply, GatewayError>,
    ) -> SubmitOutcome {
        let Reservation {
            session_id, title, ..
        } = reservation;
        let mut ui = self.lock_ui();
        self.tracker
            .advance(&session_id, SubmissionPhase::Reconciling);
        tracing::debug!(%session_id, phase = ?SubmissionPhase::Reconciling, ok = result.is_ok(), "Reconciling");

        let (content, error) = match result {
            Ok(reply) => (reply.message, None),
            Err(error) => {
                if matches!(error, GatewayError::Auth(_)) {
                    self.expiry.trigger();
                } else {
                    tracing::warn!(%session_id, kind = ?error.kind(), "Command failed: {error}");
                }
                (error.user_message(), Some(error))
            }
        };
        let message = Message::assistant(content, self.next_stamp(), kind);
        let appended = self.repository.append_message(&session_id, message.clone());
        self.tracker.end(&session_id);

        let outcome = match appended {
            Ok(Some(session)) => {
                self.auto_name(&session_id, title.as_deref());
                let stored = session.messages.last().cloned().unwrap_or(message);
                if ui.current.as_deref() == Some(session_id.as_str()) {
                    ui.messages = session.messages;
                }
                match error {
                    None => SubmitOutcome::Replied {
                        session_id,
                        message: stored,
                    },
                    Some(error) => SubmitOutcome::Failed {
                        session_id,
                        error,
                        message: stored,
                    },
                }
            }
            Ok(None) => {
                tracing::info!(%session_id, "Session deleted before its result arrived; dropping it");
                SubmitOutcome::Dropped { session_id }
            }
            Err(e) => {
                tracing::error!(%session_id, "Failed to record result: {e}");
                SubmitOutcome::Aborted(e.into())
            }
        };
        self.publish(&ui);
        tracing::debug!(phase = ?SubmissionPhase::Settled, "Submission settled");
        outcome
    }

    /// Display `id`. Unknown ids are ignored.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn switch_to(&self, id: &str) -> Result<Option<SwitchOutcome>, EngineError> {
        let mut ui = self.lock_ui();
        let outgoing = ui.current.clone();
        let outcome = self.repository.switch_to(
            id,
            outgoing.as_deref().map(|o| (o, ui.messages.as_slice())),
            &self.tracker,
        )?;
        let Some(outcome) = outcome else {
            tracing::debug!(session_id = id, "Ignoring switch to unknown session");
            return Ok(None);
        };
        ui.current = Some(id.to_string());
        ui.messages.clone_from(&outcome.messages);
        self.publish(&ui);
        tracing::debug!(session_id = id, pending = outcome.pending, "Switched session");
        Ok(Some(outcome))
    }

    /// Create an empty session with the active model and display it.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn create(&self) -> Result<SessionId, EngineError> {
        let mut ui = self.lock_ui();
        let settings = self.settings();
        let outgoing = ui.current.clone();
        let id = self.repository.create(
            &settings.model,
            &settings.cluster,
            outgoing.as_deref().map(|o| (o, ui.messages.as_slice())),
        )?;
        ui.current = Some(id.clone());
        ui.messages.clear();
        self.publish(&ui);
        self.view.push_sessions_changed();
        Ok(id)
    }

    /// Delete `id`. A request still in flight for it completes without
    /// recreating it.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn delete(&self, id: &str) -> Result<bool, EngineError> {
        let mut ui = self.lock_ui();
        if !self.repository.delete(id, &self.tracker)? {
            return Ok(false);
        }
        if ui.current.as_deref() == Some(id) {
            let state = self.repository.cached();
            ui.messages = state
                .current()
                .map(|s| s.messages.clone())
                .unwrap_or_default();
            ui.current = state.current_session_id;
        }
        self.publish(&ui);
        self.view.push_sessions_changed();
        Ok(true)
    }

    /// Rename `id`. Renaming to the current name changes nothing.
    ///
    /// # Errors
    /// Returns error if the name is blank, the session is unknown or the
    /// store fails.
    pub fn rename(&self, id: &str, name: &str) -> Result<bool, EngineError> {
        let _ui = self.lock_ui();
        let renamed = self.repository.rename(id, name)?;
        if renamed {
            self.view.push_sessions_changed();
        }
        Ok(renamed)
    }

    /// Snapshot of `id` for download.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn export(&self, id: &str) -> Result<Option<SessionExport>, EngineError> {
        Ok(self.repository.export(id)?)
    }

    /// Session list grouped by creation day.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn grouped_sessions(&self) -> Result<RecencyGroups, EngineError> {
        Ok(self.repository.group_by_recency()?)
    }

    #[must_use]
    pub fn pending_by_session(&self) -> BTreeMap<SessionId, bool> {
        self.tracker.snapshot()
    }

    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.tracker.is_pending(id)
    }

    /// Model and cluster for new sessions.
    #[must_use]
    pub fn settings(&self) -> ActiveSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the active provider configuration.
    pub fn refresh_config(&self) -> ActiveSettings {
        let active = self.configs.active().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable provider configuration: {e}");
            None
        });
        let settings = ActiveSettings::resolve(&self.ctx, active.as_ref());
        tracing::info!(
            config_id = ?settings.config_id,
            model = %settings.model,
            "Provider configuration reloaded"
        );
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clone_from(&settings);
        settings
    }

    /// Make `id` the active provider configuration.
    ///
    /// # Errors
    /// Returns error if the configuration is unknown or the store fails.
    pub fn select_config(&self, id: &str) -> Result<ActiveSettings, EngineError> {
        self.configs.select(id)?;
        Ok(self.refresh_config())
    }

    /// Provider configuration CRUD.
    #[must_use]
    pub const fn configs(&self) -> &ConfigStore<S> {
        &self.configs
    }

    /// Current view.
    #[must_use]
    pub fn snapshot(&self) -> ChatView {
        self.view.snapshot()
    }

    #[must_use]
    pub fn view(&self) -> Arc<ViewStore> {
        Arc::clone(&self.view)
    }

    #[must_use]
    pub const fn context(&self) -> &ChatContext {
        &self.ctx
    }

    #[must_use]
    pub const fn repository(&self) -> &SessionRepository<S> {
        &self.repository
    }
}

/// Listen for writes made by other contexts.
///
/// Provider configuration changes reload the engine's settings; session
/// collection changes prompt subscribers to refresh their session list.
pub fn spawn_config_listener<S, G>(engine: Arc<ConversationEngine<S, G>>) -> JoinHandle<()>
where
    S: DurableStore,
    G: CommandGateway,
{
    let mut feed = engine.store.subscribe();
    tokio::spawn(async move {
        while let Some(change) = feed.recv().await {
            if keys::is_config_key(&change.key) {
                engine.refresh_config();
            } else if change.key == keys::SESSIONS {
                engine.view.push_sessions_changed();
            }
        }
        tracing::debug!("Store change feed closed");
    })
}
