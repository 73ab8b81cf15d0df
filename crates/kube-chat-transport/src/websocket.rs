//! WebSocket transport for browser clients.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use kube_chat_core::{CommandGateway, DurableStore, ViewEvent};
use kube_chat_session::ConversationEngine;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::{
    dispatch::{dispatch, project_event},
    protocol::{ClientMessage, ServerMessage},
};

/// WebSocket handler state.
pub struct WsState<S: DurableStore, G: CommandGateway> {
    pub engine: Arc<ConversationEngine<S, G>>,
}

impl<S: DurableStore, G: CommandGateway> Clone for WsState<S, G> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S: DurableStore, G: CommandGateway> WsState<S, G> {
    #[must_use]
    pub const fn new(engine: Arc<ConversationEngine<S, G>>) -> Self {
        Self { engine }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<S, G>(
    ws: WebSocketUpgrade,
    State(state): State<WsState<S, G>>,
) -> impl IntoResponse
where
    S: DurableStore,
    G: CommandGateway,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<S, G>(socket: WebSocket, state: WsState<S, G>)
where
    S: DurableStore,
    G: CommandGateway,
{
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.encode() {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Current view and session list first, then live changes.
    let events_task = {
        let engine = Arc::clone(&state.engine);
        let tx = tx.clone();
        let mut events = engine.view().snapshot_plus_stream();
        tokio::spawn(async move {
            if let Some(msg) = project_event(&engine, ViewEvent::SessionsChanged) {
                let _ = tx.send(msg);
            }
            while let Some(event) = events.next().await {
                let Some(msg) = project_event(&engine, event) else {
                    continue;
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(msg) = receiver.next().await {
        let decoded = match msg {
            Ok(Message::Text(text)) => ClientMessage::decode(text.as_str()),
            Ok(Message::Binary(data)) => ClientMessage::decode_binary(&data),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg = match decoded {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::error(e.to_string()));
                continue;
            }
        };

        if let Some(reply) = dispatch(&state.engine, client_msg) {
            let _ = tx.send(reply);
        }
    }

    tracing::debug!("WebSocket client disconnected");
    events_task.abort();
    send_task.abort();
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(engine));
/// ```
#[must_use]
pub fn create_ws_router<S, G>(engine: Arc<ConversationEngine<S, G>>) -> axum::Router
where
    S: DurableStore,
    G: CommandGateway,
{
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<S, G>))
        .layer(TraceLayer::new_for_http())
        .with_state(WsState::new(engine))
}
