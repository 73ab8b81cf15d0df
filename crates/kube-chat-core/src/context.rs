//! Explicit context handed to the conversation engine and gateway.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Context loading error.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid context file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Client-wide settings that would otherwise be ambient globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatContext {
    /// Base URL of the command-execution agent.
    pub agent_url: String,

    /// Model used when no provider configuration selects one.
    pub default_model: String,

    /// Cluster bound to new sessions.
    pub default_cluster: String,

    /// How long an inline validation notice stays visible.
    pub notice_duration_ms: u64,

    /// Delay before the login redirect after a rejected credential.
    pub redirect_delay_ms: u64,

    /// Where the presentation layer sends the user to log in again.
    pub login_path: String,

    /// Per-request timeout enforced by the gateway.
    pub request_timeout_secs: u64,
}

impl Default for ChatContext {
    fn default() -> Self {
        Self {
            agent_url: "http://localhost:8080".to_string(),
            default_model: "qwen-max-latest".to_string(),
            default_cluster: "default".to_string(),
            notice_duration_ms: 3_000,
            redirect_delay_ms: 1_500,
            login_path: "/login".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ChatContext {
    /// Create a context pointing at `agent_url` with defaults elsewhere.
    #[must_use]
    pub fn new(agent_url: impl Into<String>) -> Self {
        Self {
            agent_url: agent_url.into(),
            ..Self::default()
        }
    }

    /// Load a context from a JSON file; missing fields take defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ContextError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    #[must_use]
    pub const fn notice_duration(&self) -> Duration {
        Duration::from_millis(self.notice_duration_ms)
    }

    #[must_use]
    pub const fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
