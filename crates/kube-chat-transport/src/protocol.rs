//! Wire protocol between the presentation layer and the engine.

use std::collections::BTreeMap;

use kube_chat_core::{ActiveSettings, ApiConfig, ChatView, Message, Notice, SessionId};
use kube_chat_gateway::CommandSpec;
use kube_chat_session::{RecencyGroups, SessionExport};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Binary frame is not UTF-8")]
    NotUtf8,
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit input to the displayed session.
    Submit { text: String },
    /// Display another session.
    SwitchSession { session_id: SessionId },
    /// Create and display an empty session.
    CreateSession,
    DeleteSession { session_id: SessionId },
    RenameSession { session_id: SessionId, name: String },
    /// Download one session.
    ExportSession { session_id: SessionId },
    /// Request the grouped session list.
    ListSessions,
    ListConfigs,
    SelectConfig { config_id: String },
    /// Command suggestions for a partially typed verb.
    Suggest { filter: String },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Decode a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a known message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    /// Returns error if the frame is not UTF-8 or not a known message.
    pub fn decode_binary(data: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NotUtf8)?;
        Self::decode(text)
    }
}

/// Catalog entry as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHint {
    /// Verb with its leading slash.
    pub command: String,
    pub description: String,
    pub example: String,
}

impl From<CommandSpec> for CommandHint {
    fn from(spec: CommandSpec) -> Self {
        Self {
            command: format!("/{}", spec.verb),
            description: spec.description.to_string(),
            example: spec.example.to_string(),
        }
    }
}

/// Provider configuration with its key masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub base_url: String,
    pub models: Vec<String>,
    pub masked_key: Option<String>,
    pub is_active: bool,
}

impl ConfigSummary {
    #[must_use]
    pub fn new(config: &ApiConfig, active_id: Option<&str>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            provider: config.provider.clone(),
            base_url: config.base_url.clone(),
            models: config.selected_models.clone(),
            masked_key: config.masked_api_key(),
            is_active: active_id == Some(config.id.as_str()),
        }
    }
}

/// Stored message plus the text a client should render for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    #[serde(flatten)]
    pub message: Message,
    /// Content with one level of JSON envelope removed.
    pub display: String,
}

impl From<Message> for DisplayMessage {
    fn from(message: Message) -> Self {
        let display = message.display_content().into_owned();
        Self { message, display }
    }
}

/// View of the displayed session as sent to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPayload {
    pub current_session_id: Option<SessionId>,
    pub messages: Vec<DisplayMessage>,
    pub is_loading: bool,
    pub notice: Option<Notice>,
    pub pending_by_session_id: BTreeMap<SessionId, bool>,
}

impl From<ChatView> for ViewPayload {
    fn from(view: ChatView) -> Self {
        Self {
            current_session_id: view.current_session_id,
            messages: view.messages.into_iter().map(Into::into).collect(),
            is_loading: view.is_loading,
            notice: view.notice,
            pending_by_session_id: view.pending_by_session_id,
        }
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full view after a change.
    View { view: ViewPayload },
    /// Grouped session list.
    Sessions {
        groups: RecencyGroups,
        current_session_id: Option<SessionId>,
    },
    Export { export: SessionExport },
    Configs {
        configs: Vec<ConfigSummary>,
        active: ActiveSettings,
    },
    Suggestions { commands: Vec<CommandHint> },
    /// Navigate to the login page.
    Redirect { path: String },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Encode as a text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use kube_chat_core::MessageKind;
    use kube_chat_gateway::suggestions;

    use super::*;

    #[test]
    fn client_messages_use_type_tag() {
        let msg = ClientMessage::decode(r#"{"type":"rename_session","session_id":"a","name":"pods"}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::RenameSession {
                session_id: "a".into(),
                name: "pods".into(),
            }
        );
        assert_eq!(
            ClientMessage::decode_binary(br#"{"type":"create_session"}"#).unwrap(),
            ClientMessage::CreateSession
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(
            ClientMessage::decode(r#"{"type":"resize"}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            ClientMessage::decode_binary(&[0xff, 0xfe]),
            Err(ProtocolError::NotUtf8)
        ));
    }

    #[test]
    fn view_is_sent_in_camel_case() {
        let json = ServerMessage::View {
            view: ChatView::default().into(),
        }
        .encode()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "view");
        assert_eq!(value["view"]["isLoading"], false);
        assert!(value["view"]["pendingBySessionId"].is_object());
    }

    #[test]
    fn messages_carry_display_text_beside_stored_content() {
        let view = ChatView {
            messages: vec![
                Message::user("get pods", 1, MessageKind::Chat),
                Message::assistant(r#"{"message":"3 pods running"}"#, 2, MessageKind::Chat),
            ],
            ..ChatView::default()
        };
        let json = ServerMessage::View { view: view.into() }.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let messages = &value["view"]["messages"];
        assert_eq!(messages[0]["display"], "get pods");
        assert_eq!(messages[1]["display"], "3 pods running");
        assert_eq!(messages[1]["content"], r#"{"message":"3 pods running"}"#);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["timestamp"], 2);
    }

    #[test]
    fn hints_carry_slash_prefix() {
        let hints: Vec<CommandHint> = suggestions("/di").into_iter().map(Into::into).collect();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].command, "/diagnose");
    }

    #[test]
    fn config_summary_masks_key() {
        let config = ApiConfig {
            id: "c1".into(),
            name: "work".into(),
            provider: "OpenAI".into(),
            api_key: "sk-abcdefghijklmnopqrstuvwxyz0123456789".into(),
            base_url: "https://api.openai.com/v1".into(),
            selected_models: vec!["gpt-4".into()],
            is_active: true,
            created_at: 0,
            updated_at: 0,
        };
        let summary = ConfigSummary::new(&config, Some("c1"));
        assert!(summary.is_active);
        let masked = summary.masked_key.unwrap();
        assert!(!masked.contains("abcdefghijklmnop"));
        assert!(!ConfigSummary::new(&config, None).is_active);
    }
}
