//! Routing of client messages to the conversation engine.

use std::sync::Arc;

use kube_chat_core::{CommandGateway, DurableStore, ViewEvent};
use kube_chat_gateway::suggestions;
use kube_chat_session::{ConversationEngine, EngineError, SubmitOutcome};

use crate::protocol::{ClientMessage, ConfigSummary, ServerMessage};

/// Handle one client message.
///
/// Submissions run in the background and report through the view stream, as
/// do session switches, creation and deletion. Queries answer directly.
pub fn dispatch<S, G>(
    engine: &Arc<ConversationEngine<S, G>>,
    msg: ClientMessage,
) -> Option<ServerMessage>
where
    S: DurableStore,
    G: CommandGateway,
{
    let result = match msg {
        ClientMessage::Ping => return Some(ServerMessage::Pong),
        ClientMessage::Submit { text } => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                if let SubmitOutcome::Aborted(e) = engine.submit(&text).await {
                    tracing::error!("Submission aborted: {e}");
                }
            });
            return None;
        }
        ClientMessage::SwitchSession { session_id } => {
            engine.switch_to(&session_id).map(|_| None)
        }
        ClientMessage::CreateSession => engine.create().map(|_| None),
        ClientMessage::DeleteSession { session_id } => engine.delete(&session_id).map(|_| None),
        ClientMessage::RenameSession { session_id, name } => {
            engine.rename(&session_id, &name).map(|_| None)
        }
        ClientMessage::ExportSession { session_id } => engine.export(&session_id).map(|export| {
            Some(export.map_or_else(
                || ServerMessage::error(format!("会话不存在: {session_id}")),
                |export| ServerMessage::Export { export },
            ))
        }),
        ClientMessage::ListSessions => session_list(engine).map(Some),
        ClientMessage::ListConfigs => config_list(engine).map(Some),
        ClientMessage::SelectConfig { config_id } => engine
            .select_config(&config_id)
            .and_then(|_| config_list(engine))
            .map(Some),
        ClientMessage::Suggest { filter } => Ok(Some(ServerMessage::Suggestions {
            commands: suggestions(&filter).into_iter().map(Into::into).collect(),
        })),
    };
    result.unwrap_or_else(|e| {
        tracing::warn!("Request failed: {e}");
        Some(ServerMessage::error(e.to_string()))
    })
}

/// Translate a view event into the message a client should receive.
pub fn project_event<S, G>(
    engine: &ConversationEngine<S, G>,
    event: ViewEvent,
) -> Option<ServerMessage>
where
    S: DurableStore,
    G: CommandGateway,
{
    match event {
        ViewEvent::View(view) => Some(ServerMessage::View { view: view.into() }),
        ViewEvent::SessionsChanged => match session_list(engine) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!("Failed to list sessions: {e}");
                None
            }
        },
        ViewEvent::LoginRequired { path } => Some(ServerMessage::Redirect { path }),
    }
}

fn session_list<S, G>(engine: &ConversationEngine<S, G>) -> Result<ServerMessage, EngineError>
where
    S: DurableStore,
    G: CommandGateway,
{
    Ok(ServerMessage::Sessions {
        groups: engine.grouped_sessions()?,
        current_session_id: engine.snapshot().current_session_id,
    })
}

fn config_list<S, G>(engine: &ConversationEngine<S, G>) -> Result<ServerMessage, EngineError>
where
    S: DurableStore,
    G: CommandGateway,
{
    let active = engine.settings();
    let configs = engine
        .configs()
        .list()?
        .iter()
        .map(|config| ConfigSummary::new(config, active.config_id.as_deref()))
        .collect();
    Ok(ServerMessage::Configs { configs, active })
}
