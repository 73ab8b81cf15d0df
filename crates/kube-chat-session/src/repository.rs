//! Session repository over the durable store.
//!
//! The whole collection lives under one key. Every mutation re-reads that
//! document, applies the change and writes it back, so writes made by another
//! context since the last read are kept (last writer wins per document).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, TimeZone, Utc};
use kube_chat_core::{
    Clock, DurableStore, Message, Session, SessionId, SessionsState, StoreError, SystemClock,
    traits::{keys, read_json, write_json},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    naming,
    recency::{RecencyGroups, group_by_recency_at},
    tracker::PendingTracker,
};

/// Repository error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("会话名称不能为空")]
    EmptyName,
}

/// Result of switching sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub messages: Vec<Message>,
    /// Whether the session still has a request in flight.
    pub pending: bool,
}

/// Portable snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub session: Session,
    pub exported_at: i64,
}

enum Outcome<T> {
    Write(T),
    Skip(T),
}

/// Add displayed messages missing from the stored copy of `id`.
fn merge_displayed(state: &mut SessionsState, id: &str, displayed: &[Message], now: i64) -> bool {
    let Some(session) = state.get_mut(id) else {
        return false;
    };
    let mut added = false;
    for message in displayed {
        if !session.messages.iter().any(|m| m.timestamp == message.timestamp) {
            session.messages.push(message.clone());
            added = true;
        }
    }
    if added {
        session.messages.sort_by_key(|m| m.timestamp);
        session.updated_at = now.max(session.updated_at);
    }
    added
}

/// CRUD over the persisted sessions collection.
pub struct SessionRepository<S: DurableStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    /// Last document read or written. Stale after any await.
    cache: Mutex<SessionsState>,
}

impl<S: DurableStore> SessionRepository<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cache: Mutex::new(SessionsState::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, SessionsState> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> Result<SessionsState, RepositoryError> {
        let mut state = match read_json::<_, SessionsState>(&*self.store, keys::SESSIONS) {
            Ok(state) => state.unwrap_or_default(),
            Err(StoreError::Corrupt { key, source }) => {
                tracing::warn!(%key, "Discarding unreadable sessions document: {source}");
                SessionsState::default()
            }
            Err(e) => return Err(e.into()),
        };
        if state.repair_current() {
            tracing::debug!("Stored current session was missing; repaired on read");
        }
        self.cache().clone_from(&state);
        Ok(state)
    }

    fn transact<T>(
        &self,
        f: impl FnOnce(&mut SessionsState) -> Result<Outcome<T>, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut state = self.read()?;
        match f(&mut state)? {
            Outcome::Write(value) => {
                state.repair_current();
                write_json(&*self.store, keys::SESSIONS, &state)?;
                *self.cache() = state;
                Ok(value)
            }
            Outcome::Skip(value) => Ok(value),
        }
    }

    /// Fresh copy of the stored collection.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn load(&self) -> Result<SessionsState, RepositoryError> {
        self.read()
    }

    /// Collection as of the last read or write, without touching the store.
    #[must_use]
    pub fn cached(&self) -> SessionsState {
        self.cache().clone()
    }

    /// # Errors
    /// Returns error if the store read fails.
    pub fn sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        Ok(self.read()?.sessions)
    }

    /// # Errors
    /// Returns error if the store read fails.
    pub fn session(&self, id: &str) -> Result<Option<Session>, RepositoryError> {
        Ok(self.read()?.get(id).cloned())
    }

    /// Freshest stored messages of `id`.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn messages(&self, id: &str) -> Result<Option<Vec<Message>>, RepositoryError> {
        Ok(self.session(id)?.map(|s| s.messages))
    }

    /// # Errors
    /// Returns error if the store read fails.
    pub fn current_id(&self) -> Result<Option<SessionId>, RepositoryError> {
        Ok(self.read()?.current_session_id)
    }

    /// Write displayed messages of `id` that the store does not have yet.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn flush(&self, id: &str, displayed: &[Message]) -> Result<bool, RepositoryError> {
        let now = self.clock.now_millis();
        self.transact(|state| {
            if merge_displayed(state, id, displayed, now) {
                Ok(Outcome::Write(true))
            } else {
                Ok(Outcome::Skip(false))
            }
        })
    }

    /// Create a session and make it current.
    ///
    /// `outgoing` is the displayed session and its messages, flushed in the
    /// same write.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn create(
        &self,
        model: &str,
        cluster: &str,
        outgoing: Option<(&str, &[Message])>,
    ) -> Result<SessionId, RepositoryError> {
        let now = self.clock.now_millis();
        let id = Uuid::new_v4().to_string();
        self.transact(|state| {
            if let Some((outgoing_id, displayed)) = outgoing {
                merge_displayed(state, outgoing_id, displayed, now);
            }
            state.sessions.push(Session {
                id: id.clone(),
                name: naming::default_name(state.sessions.len() + 1),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
                model: model.to_string(),
                cluster: cluster.to_string(),
            });
            state.current_session_id = Some(id.clone());
            Ok(Outcome::Write(()))
        })?;
        tracing::info!(session_id = %id, model, cluster, "Created session");
        Ok(id)
    }

    /// Make `id` current. Unknown ids are ignored and yield `None`.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn switch_to(
        &self,
        id: &str,
        outgoing: Option<(&str, &[Message])>,
        tracker: &PendingTracker,
    ) -> Result<Option<SwitchOutcome>, RepositoryError> {
        let now = self.clock.now_millis();
        let messages = self.transact(|state| {
            if !state.contains(id) {
                return Ok(Outcome::Skip(None));
            }
            if let Some((outgoing_id, displayed)) = outgoing {
                merge_displayed(state, outgoing_id, displayed, now);
            }
            state.current_session_id = Some(id.to_string());
            let messages = state.get(id).map(|s| s.messages.clone()).unwrap_or_default();
            Ok(Outcome::Write(Some(messages)))
        })?;
        Ok(messages.map(|messages| SwitchOutcome {
            messages,
            pending: tracker.is_pending(id),
        }))
    }

    /// Delete `id` and forget any request outstanding for it.
    ///
    /// Deleting the current session moves the pointer to the first remaining
    /// session, or clears it. The tracker entry is only dropped once the
    /// deletion has been written.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn delete(&self, id: &str, tracker: &PendingTracker) -> Result<bool, RepositoryError> {
        let deleted = self.transact(|state| {
            let before = state.sessions.len();
            state.sessions.retain(|s| s.id != id);
            if state.sessions.len() == before {
                return Ok(Outcome::Skip(false));
            }
            if state.current_session_id.as_deref() == Some(id) {
                state.current_session_id = state.sessions.first().map(|s| s.id.clone());
            }
            Ok(Outcome::Write(true))
        })?;
        if deleted {
            let dropped_pending = tracker.end(id);
            tracing::info!(session_id = id, dropped_pending, "Deleted session");
        }
        Ok(deleted)
    }

    /// Rename `id`. Returns false when the name is unchanged.
    ///
    /// # Errors
    /// Returns error if the name is blank, the session is unknown or the
    /// store fails.
    pub fn rename(&self, id: &str, name: &str) -> Result<bool, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::EmptyName);
        }
        let now = self.clock.now_millis();
        let renamed = self.transact(|state| {
            let session = state
                .get_mut(id)
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
            if session.name == name {
                return Ok(Outcome::Skip(false));
            }
            session.name = name.to_string();
            session.updated_at = now.max(session.updated_at);
            Ok(Outcome::Write(true))
        })?;
        if renamed {
            tracing::debug!(session_id = id, name, "Renamed session");
        }
        Ok(renamed)
    }

    /// Apply an automatic title if the stored session is still eligible.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn rename_if_eligible(&self, id: &str, title: &str) -> Result<bool, RepositoryError> {
        let now = self.clock.now_millis();
        self.transact(|state| {
            let Some(session) = state.get_mut(id) else {
                return Ok(Outcome::Skip(false));
            };
            if !naming::is_eligible(session) || session.name == title {
                return Ok(Outcome::Skip(false));
            }
            session.name = title.to_string();
            session.updated_at = now.max(session.updated_at);
            Ok(Outcome::Write(true))
        })
    }

    /// Append `message` to `id`, returning the updated session.
    ///
    /// The timestamp is raised above the session's newest message when
    /// needed. A session deleted in the meantime is not recreated; `None` is
    /// returned instead.
    ///
    /// # Errors
    /// Returns error if the store read or write fails.
    pub fn append_message(
        &self,
        id: &str,
        mut message: Message,
    ) -> Result<Option<Session>, RepositoryError> {
        let now = self.clock.now_millis();
        self.transact(|state| {
            let Some(session) = state.get_mut(id) else {
                return Ok(Outcome::Skip(None));
            };
            if let Some(last) = session.last_timestamp() {
                message.timestamp = message.timestamp.max(last + 1);
            }
            session.messages.push(message);
            session.updated_at = now.max(session.updated_at);
            Ok(Outcome::Write(Some(session.clone())))
        })
    }

    /// Snapshot of `id` stamped with the export time.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn export(&self, id: &str) -> Result<Option<SessionExport>, RepositoryError> {
        let exported_at = self.clock.now_millis();
        Ok(self.session(id)?.map(|session| SessionExport {
            session,
            exported_at,
        }))
    }

    /// Sessions grouped by local creation day.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn group_by_recency(&self) -> Result<RecencyGroups, RepositoryError> {
        self.group_by_recency_in(&Local)
    }

    /// Sessions grouped by creation day in `tz`.
    ///
    /// # Errors
    /// Returns error if the store read fails.
    pub fn group_by_recency_in<Tz: TimeZone>(&self, tz: &Tz) -> Result<RecencyGroups, RepositoryError> {
        let state = self.read()?;
        let now = DateTime::<Utc>::from_timestamp_millis(self.clock.now_millis())
            .unwrap_or_default()
            .with_timezone(tz);
        Ok(group_by_recency_at(&state.sessions, &now))
    }
}
