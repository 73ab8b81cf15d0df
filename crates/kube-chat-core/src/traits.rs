//! Core data model plus the store and gateway traits.

use std::borrow::Cow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::Command;

/// Session identifier.
pub type SessionId = String;

/// Well-known durable store keys.
pub mod keys {
    /// Whole sessions collection (`SessionsState` as JSON).
    pub const SESSIONS: &str = "chat_sessions";
    /// Id of the active provider configuration.
    pub const CURRENT_CONFIG: &str = "current_config_id";
    /// Stored provider configurations.
    pub const API_CONFIGS: &str = "api_configs";
    /// Login token sent as a bearer credential.
    pub const CREDENTIAL: &str = "jwt";
    /// API key saved by older clients before provider configurations existed.
    pub const LEGACY_API_KEY: &str = "openai_api_key";

    /// Whether a change to `key` affects the active provider configuration.
    #[must_use]
    pub fn is_config_key(key: &str) -> bool {
        key == CURRENT_CONFIG || key == API_CONFIGS
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Whether a message belongs to an explicit command exchange or free-form chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    #[default]
    Chat,
}

/// A single appended message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds, unique and increasing within a session.
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>, timestamp: i64, kind: MessageKind) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
            kind,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, timestamp: i64, kind: MessageKind) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp,
            kind,
        }
    }

    /// Content for display, with one level of JSON envelope removed.
    ///
    /// Agents sometimes answer with `{"message": "..."}` or a bare JSON string.
    /// The stored content is left untouched.
    #[must_use]
    pub fn display_content(&self) -> Cow<'_, str> {
        match serde_json::from_str::<Value>(&self.content) {
            Ok(Value::String(inner)) => Cow::Owned(inner),
            Ok(Value::Object(map)) => match map.get("message").and_then(Value::as_str) {
                Some(inner) => Cow::Owned(inner.to_string()),
                None => Cow::Borrowed(&self.content),
            },
            _ => Cow::Borrowed(&self.content),
        }
    }
}

/// Persisted conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Creation timestamp (epoch milliseconds).
    pub created_at: i64,
    /// Bumped on every append or rename.
    pub updated_at: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub cluster: String,
}

impl Session {
    /// Timestamp of the newest message, if any.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.messages.last().map(|m| m.timestamp)
    }
}

/// Whole persisted sessions document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionsState {
    pub sessions: Vec<Session>,
    pub current_session_id: Option<SessionId>,
}

impl SessionsState {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current_session_id.as_deref().and_then(|id| self.get(id))
    }

    /// Point `current_session_id` at an existing session or clear it.
    ///
    /// Returns true when the pointer had to change.
    pub fn repair_current(&mut self) -> bool {
        let valid = self
            .current_session_id
            .as_deref()
            .is_none_or(|id| self.contains(id));
        if valid {
            return false;
        }
        self.current_session_id = self.sessions.first().map(|s| s.id.clone());
        true
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid store key: {0}")]
    InvalidKey(String),
    #[error("Corrupt document under key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Notification that a key was written by another execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    /// Handle that performed the write.
    pub origin: u64,
}

/// Receiver of store changes made through other handles.
///
/// Writes made through the subscribing handle itself are filtered out, matching
/// how browser storage events only fire in other tabs.
pub struct ChangeFeed {
    origin: u64,
    rx: broadcast::Receiver<StoreChange>,
}

impl ChangeFeed {
    #[must_use]
    pub fn new(origin: u64, rx: broadcast::Receiver<StoreChange>) -> Self {
        Self { origin, rx }
    }

    /// Wait for the next foreign change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.origin == self.origin => {}
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Store change feed lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`ChangeFeed::recv`].
    pub fn try_recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.origin == self.origin => {}
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Key/value persistence with synchronous access.
pub trait DurableStore: Send + Sync + 'static {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to writes made by other handles of the same store.
    fn subscribe(&self) -> ChangeFeed;
}

/// Read and decode a JSON document.
///
/// # Errors
/// Returns error if the read fails or the document does not decode.
pub fn read_json<S, T>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    S: DurableStore + ?Sized,
    T: DeserializeOwned,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })
}

/// Encode and write a JSON document.
///
/// # Errors
/// Returns error if encoding or the write fails.
pub fn write_json<S, T>(store: &S, key: &str, value: &T) -> Result<(), StoreError>
where
    S: DurableStore + ?Sized,
    T: Serialize,
{
    let raw = serde_json::to_string(value).map_err(StoreError::Serialize)?;
    store.set(key, &raw)
}

/// Text shown when the agent rejects the stored credential.
pub const SESSION_EXPIRED_TEXT: &str = "登录已过期，请重新登录";

/// Text shown when no readable message can be extracted from a failure.
pub const GENERIC_FAILURE_TEXT: &str = "抱歉，处理您的请求时出现错误。请稍后重试。";

/// Successful gateway reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub message: String,
}

impl Reply {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Payload attached to a gateway failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    /// HTTP-like status, when the failure came from a response.
    pub status: Option<u16>,
    /// Message already written for the user.
    pub friendly: Option<String>,
    /// Raw response body or error text.
    pub payload: Option<String>,
}

impl ErrorDetail {
    #[must_use]
    pub fn status(status: u16, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            status: Some(status),
            friendly: None,
            payload: (!payload.trim().is_empty()).then_some(payload),
        }
    }

    #[must_use]
    pub fn friendly(message: impl Into<String>) -> Self {
        Self {
            friendly: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Best-effort readable text: friendly message, then a JSON `message`
    /// field inside the payload, then the raw payload.
    #[must_use]
    pub fn readable_message(&self) -> Option<String> {
        if let Some(friendly) = non_blank(self.friendly.as_deref()) {
            return Some(friendly.to_string());
        }
        let payload = non_blank(self.payload.as_deref())?;
        if let Ok(value) = serde_json::from_str::<Value>(payload) {
            let nested = value
                .get("message")
                .or_else(|| value.get("error").and_then(|e| e.get("message")))
                .and_then(Value::as_str);
            if let Some(message) = non_blank(nested) {
                return Some(message.to_string());
            }
        }
        Some(payload.to_string())
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, self.readable_message()) {
            (Some(status), Some(message)) => write!(f, "status {status}: {message}"),
            (Some(status), None) => write!(f, "status {status}"),
            (None, Some(message)) => f.write_str(&message),
            (None, None) => f.write_str("no details"),
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Coarse classification of gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    Validation,
    Auth,
    Transport,
}

/// Gateway error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Request rejected: {0}")]
    Validation(ErrorDetail),
    #[error("Authentication rejected: {0}")]
    Auth(ErrorDetail),
    #[error("Transport failure: {0}")]
    Transport(ErrorDetail),
}

impl GatewayError {
    #[must_use]
    pub const fn kind(&self) -> GatewayErrorKind {
        match self {
            Self::Validation(_) => GatewayErrorKind::Validation,
            Self::Auth(_) => GatewayErrorKind::Auth,
            Self::Transport(_) => GatewayErrorKind::Transport,
        }
    }

    #[must_use]
    pub const fn detail(&self) -> &ErrorDetail {
        match self {
            Self::Validation(d) | Self::Auth(d) | Self::Transport(d) => d,
        }
    }

    /// Text recorded in the conversation for this failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(_) => SESSION_EXPIRED_TEXT.to_string(),
            other => other
                .detail()
                .readable_message()
                .unwrap_or_else(|| GENERIC_FAILURE_TEXT.to_string()),
        }
    }
}

/// Trait for the remote command-execution agent.
#[async_trait]
pub trait CommandGateway: Send + Sync + 'static {
    /// Send a parsed command on behalf of a session.
    async fn send(&self, command: &Command, model: &str, cluster: &str)
    -> Result<Reply, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> Message {
        Message::assistant(content, 1, MessageKind::Chat)
    }

    #[test]
    fn display_unwraps_one_level_of_envelope() {
        assert_eq!(message(r#"{"message":"3 pods running"}"#).display_content(), "3 pods running");
        assert_eq!(message(r#""quoted""#).display_content(), "quoted");
        assert_eq!(message("plain **markdown**").display_content(), "plain **markdown**");
        assert_eq!(message(r#"{"other":1}"#).display_content(), r#"{"other":1}"#);
    }

    #[test]
    fn readable_message_precedence() {
        let friendly = ErrorDetail::friendly("请求超时").with_payload(r#"{"message":"ignored"}"#);
        assert_eq!(friendly.readable_message().as_deref(), Some("请求超时"));

        let nested = ErrorDetail::status(500, r#"{"message":"cluster unreachable"}"#);
        assert_eq!(nested.readable_message().as_deref(), Some("cluster unreachable"));

        let deeper = ErrorDetail::status(500, r#"{"error":{"message":"quota exceeded"}}"#);
        assert_eq!(deeper.readable_message().as_deref(), Some("quota exceeded"));

        let raw = ErrorDetail::status(502, "Bad Gateway");
        assert_eq!(raw.readable_message().as_deref(), Some("Bad Gateway"));

        assert_eq!(ErrorDetail::status(500, "  ").readable_message(), None);
    }

    #[test]
    fn user_message_falls_back_to_generic_text() {
        let err = GatewayError::Transport(ErrorDetail::default());
        assert_eq!(err.user_message(), GENERIC_FAILURE_TEXT);

        let auth = GatewayError::Auth(ErrorDetail::status(401, "token expired"));
        assert_eq!(auth.user_message(), SESSION_EXPIRED_TEXT);
        assert_eq!(auth.kind(), GatewayErrorKind::Auth);
    }

    #[test]
    fn repair_current_points_at_first_session() {
        let session = Session {
            id: "a".into(),
            name: "Session 1".into(),
            messages: vec![],
            created_at: 0,
            updated_at: 0,
            model: String::new(),
            cluster: String::new(),
        };
        let mut state = SessionsState {
            sessions: vec![session],
            current_session_id: Some("gone".into()),
        };
        assert!(state.repair_current());
        assert_eq!(state.current_session_id.as_deref(), Some("a"));
        assert!(!state.repair_current());

        state.sessions.clear();
        assert!(state.repair_current());
        assert_eq!(state.current_session_id, None);
    }

    #[test]
    fn sessions_state_uses_camel_case_on_disk() {
        let raw = r#"{"sessions":[{"id":"x","name":"n","messages":[{"role":"user","content":"hi","timestamp":5}],"createdAt":1,"updatedAt":2,"model":"m","cluster":"c"}],"currentSessionId":"x"}"#;
        let state: SessionsState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.current().unwrap().messages[0].kind, MessageKind::Chat);
        let encoded = serde_json::to_string(&state).unwrap();
        assert!(encoded.contains("\"createdAt\":1"));
        assert!(encoded.contains("\"type\":\"chat\""));
    }
}
