//! Per-session record of outstanding requests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, PoisonError},
};

use kube_chat_core::SessionId;
use serde::{Deserialize, Serialize};

/// Lifecycle of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    /// Input is being parsed; nothing is recorded yet.
    Validating,
    /// The request is on the wire.
    Dispatched,
    /// The outcome is being written back.
    Reconciling,
    /// Nothing outstanding.
    Settled,
}

/// Tracks which sessions have a request in flight.
///
/// Never persisted: a fresh tracker starts empty.
#[derive(Debug, Default)]
pub struct PendingTracker {
    inner: Mutex<HashMap<SessionId, SubmissionPhase>>,
}

impl PendingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SubmissionPhase>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `id` as dispatched. Returns false if it already has a request.
    pub fn begin(&self, id: &str) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(id) {
            return false;
        }
        entries.insert(id.to_string(), SubmissionPhase::Dispatched);
        true
    }

    /// Move an outstanding request to `phase`. No-op when nothing is outstanding.
    pub fn advance(&self, id: &str, phase: SubmissionPhase) {
        if let Some(current) = self.entries().get_mut(id) {
            *current = phase;
        }
    }

    /// Clear the entry for `id`. Returns whether one existed.
    pub fn end(&self, id: &str) -> bool {
        self.entries().remove(id).is_some()
    }

    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    /// Phase of the request for `id`, `Settled` when there is none.
    #[must_use]
    pub fn phase(&self, id: &str) -> SubmissionPhase {
        self.entries()
            .get(id)
            .copied()
            .unwrap_or(SubmissionPhase::Settled)
    }

    /// Sessions with an outstanding request.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<SessionId, bool> {
        self.entries().keys().map(|id| (id.clone(), true)).collect()
    }
}
