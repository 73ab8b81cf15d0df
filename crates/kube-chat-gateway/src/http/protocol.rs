//! Agent request/response bodies and status classification.

use kube_chat_core::{Command, ErrorDetail, GatewayError, Reply};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body posted to a verb endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Verb and arguments as one line, e.g. `execute get pods`.
    pub command: String,
    pub model: String,
    pub cluster: String,
    pub args: String,
}

impl CommandRequest {
    #[must_use]
    pub fn new(command: &Command, model: &str, cluster: &str) -> Self {
        Self {
            command: command.command_line(),
            model: model.to_string(),
            cluster: cluster.to_string(),
            args: command.args.clone(),
        }
    }
}

/// Successful agent response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandResponse {
    /// Usually a string; structured payloads are kept as raw JSON.
    pub message: Value,
    #[serde(default)]
    pub status: Option<String>,
}

impl CommandResponse {
    #[must_use]
    pub fn into_reply(self) -> Reply {
        match self.message {
            Value::String(message) => Reply::new(message),
            other => Reply::new(other.to_string()),
        }
    }
}

/// Map a non-success status and its body to a tagged failure.
#[must_use]
pub fn classify(status: u16, body: impl Into<String>) -> GatewayError {
    let detail = ErrorDetail::status(status, body);
    match status {
        401 => GatewayError::Auth(detail),
        400 | 422 => GatewayError::Validation(detail),
        _ => GatewayError::Transport(detail),
    }
}
