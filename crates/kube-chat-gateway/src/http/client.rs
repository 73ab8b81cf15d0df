//! reqwest-backed command gateway.

use std::sync::Arc;

use async_trait::async_trait;
use kube_chat_core::{
    ChatContext, Command, CommandGateway, DurableStore, ErrorDetail, GatewayError, Reply,
};
use reqwest::Client;

use super::protocol::{CommandRequest, CommandResponse, classify};
use crate::auth::{API_KEY_HEADER, Credentials};

const CONNECT_FAILED_TEXT: &str = "无法连接到服务器，请检查网络连接";
const TIMEOUT_TEXT: &str = "请求超时，请稍后重试";

/// Gateway posting commands to the agent over HTTP.
///
/// Credentials are read from the store on every call, so a login or a
/// provider switch in another context applies to the next request.
pub struct HttpGateway<S: DurableStore> {
    client: Client,
    base_url: String,
    store: Arc<S>,
}

impl<S: DurableStore> HttpGateway<S> {
    /// Create a gateway for the agent named in `ctx`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(ctx: &ChatContext, store: Arc<S>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(ctx.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: ctx.agent_url.trim_end_matches('/').to_string(),
            store,
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn request_failure(err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Transport(ErrorDetail::friendly(TIMEOUT_TEXT).with_payload(err.to_string()))
    } else if err.is_connect() {
        GatewayError::Transport(
            ErrorDetail::friendly(CONNECT_FAILED_TEXT).with_payload(err.to_string()),
        )
    } else {
        GatewayError::Transport(ErrorDetail::default().with_payload(err.to_string()))
    }
}

#[async_trait]
impl<S: DurableStore> CommandGateway for HttpGateway<S> {
    async fn send(
        &self,
        command: &Command,
        model: &str,
        cluster: &str,
    ) -> Result<Reply, GatewayError> {
        let credentials = Credentials::load(&*self.store).map_err(|e| {
            GatewayError::Transport(ErrorDetail::default().with_payload(e.to_string()))
        })?;

        let url = format!("{}{}", self.base_url, command.verb.endpoint());
        tracing::debug!(%url, verb = %command.verb, model, cluster, "Sending command");

        let mut request = self
            .client
            .post(&url)
            .json(&CommandRequest::new(command, model, cluster));
        if let Some(token) = &credentials.token {
            request = request.bearer_auth(token);
        }
        if let Some(key) = &credentials.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| request_failure(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| request_failure(&e))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Agent rejected command");
            return Err(classify(status.as_u16(), body));
        }

        serde_json::from_str::<CommandResponse>(&body)
            .map(CommandResponse::into_reply)
            .map_err(|e| {
                tracing::warn!("Unreadable agent response: {e}");
                GatewayError::Transport(ErrorDetail::status(status.as_u16(), body))
            })
    }
}
