//! Observable view state: latest snapshot plus broadcast of changes.

use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::traits::{Message, SessionId};

/// Transient inline notice, e.g. a rejected command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: u64,
    pub text: String,
}

/// What the presentation layer renders for the displayed session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub current_session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    /// Whether the displayed session has an outstanding request.
    pub is_loading: bool,
    pub notice: Option<Notice>,
    pub pending_by_session_id: BTreeMap<SessionId, bool>,
}

/// Event published to view subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// Full view after a change.
    View(ChatView),
    /// The session list (names, membership, ordering) may have changed.
    SessionsChanged,
    /// The credential was rejected; navigate to `path`.
    LoginRequired { path: String },
}

/// View store with broadcast support.
///
/// Late subscribers get the current view first, then live updates.
pub struct ViewStore {
    inner: RwLock<ChatView>,
    sender: broadcast::Sender<ViewEvent>,
}

impl Default for ViewStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewStore {
    /// Create a new view store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(ChatView::default()),
            sender,
        }
    }

    /// Current view.
    #[must_use]
    pub fn snapshot(&self) -> ChatView {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the view and publish it if anything changed.
    pub fn update<F: FnOnce(&mut ChatView)>(&self, f: F) {
        let published = {
            let mut view = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let before = view.clone();
            f(&mut view);
            (*view != before).then(|| view.clone())
        };
        if let Some(view) = published {
            self.push(ViewEvent::View(view));
        }
    }

    /// Push an event to live listeners.
    pub fn push(&self, event: ViewEvent) {
        let _ = self.sender.send(event);
    }

    /// Signal that the session list changed.
    pub fn push_sessions_changed(&self) {
        self.push(ViewEvent::SessionsChanged);
    }

    /// Signal that the user must log in again.
    pub fn push_login_required(&self, path: impl Into<String>) {
        self.push(ViewEvent::LoginRequired { path: path.into() });
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<ViewEvent> {
        self.sender.subscribe()
    }

    /// Stream that yields the current view first, then live updates.
    #[must_use]
    pub fn snapshot_plus_stream(&self) -> futures::stream::BoxStream<'static, ViewEvent> {
        // Subscribe before reading so nothing published in between is lost.
        let rx = self.get_receiver();
        let current = futures::stream::once(futures::future::ready(ViewEvent::View(
            self.snapshot(),
        )));
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("View subscriber lagged: {e}");
                    None
                }
            }
        });
        Box::pin(current.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_publishes_only_real_changes() {
        let store = ViewStore::new();
        let mut rx = store.get_receiver();

        store.update(|v| v.is_loading = true);
        store.update(|v| v.is_loading = true);

        let first = rx.try_recv().unwrap();
        assert!(matches!(first, ViewEvent::View(ref v) if v.is_loading));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscriber_sees_current_view_first() {
        let store = ViewStore::new();
        store.update(|v| v.current_session_id = Some("a".into()));

        let mut stream = store.snapshot_plus_stream();
        store.push_sessions_changed();

        match stream.next().await.unwrap() {
            ViewEvent::View(view) => assert_eq!(view.current_session_id.as_deref(), Some("a")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(stream.next().await.unwrap(), ViewEvent::SessionsChanged);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_string(&ViewEvent::LoginRequired { path: "/login".into() }).unwrap();
        assert_eq!(json, r#"{"type":"login_required","path":"/login"}"#);
    }
}
