//! Web chat client for a Kubernetes agent.
//!
//! Run with: cargo run -p web-server-demo
//!
//! Then open http://localhost:3000 in your browser.
//!
//! Environment:
//! - `KUBE_CHAT_CONFIG` - JSON client settings file
//! - `KUBE_CHAT_AGENT_URL` - agent base URL, overriding the settings file
//! - `KUBE_CHAT_DATA_DIR` - directory holding sessions and configurations

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::{Router, response::Html, routing::get};
use kube_chat_core::ChatContext;
use kube_chat_gateway::HttpGateway;
use kube_chat_session::{ConversationEngine, FileStore, spawn_config_listener};
use kube_chat_transport::create_ws_router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn load_context() -> anyhow::Result<ChatContext> {
    let mut ctx = match std::env::var_os("KUBE_CHAT_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            ChatContext::from_file(&path)
                .with_context(|| format!("loading settings from {}", path.display()))?
        }
        None => ChatContext::default(),
    };
    if let Ok(url) = std::env::var("KUBE_CHAT_AGENT_URL") {
        ctx.agent_url = url;
    }
    Ok(ctx)
}

fn data_dir() -> PathBuf {
    std::env::var_os("KUBE_CHAT_DATA_DIR").map_or_else(
        || {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("kube-chat")
        },
        PathBuf::from,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let ctx = load_context()?;
    let dir = data_dir();
    let store = Arc::new(
        FileStore::open(&dir).with_context(|| format!("opening store in {}", dir.display()))?,
    );
    let gateway = Arc::new(HttpGateway::new(&ctx, Arc::clone(&store))?);
    tracing::info!(agent = gateway.base_url(), data = %dir.display(), "Starting chat client");

    let engine = Arc::new(ConversationEngine::new(ctx, store, gateway)?);
    let _listener = spawn_config_listener(Arc::clone(&engine));

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(engine))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Kube Chat</title>
    <style>
        body {
            margin: 0;
            display: flex;
            height: 100vh;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        #sidebar { width: 260px; padding: 12px; border-right: 1px solid #333; overflow-y: auto; }
        #main { flex: 1; display: flex; flex-direction: column; }
        #messages { flex: 1; padding: 16px; overflow-y: auto; }
        #composer { display: flex; padding: 12px; border-top: 1px solid #333; }
        #input { flex: 1; padding: 8px; background: #252526; color: inherit; border: 1px solid #444; }
        .group { color: #888; font-size: 12px; margin: 12px 0 4px; }
        .session { padding: 6px; cursor: pointer; border-radius: 4px; }
        .session.current { background: #37373d; }
        .session .pending::after { content: ' …'; }
        .msg { margin: 8px 0; white-space: pre-wrap; }
        .user { color: #9cdcfe; }
        .assistant { color: #d4d4d4; }
        .notice { color: #e5c07b; min-height: 20px; padding: 0 12px; }
        #suggestions { color: #888; font-size: 12px; padding: 0 12px; }
    </style>
</head>
<body>
    <div id="sidebar">
        <button id="new">新建会话</button>
        <div id="sessions"></div>
    </div>
    <div id="main">
        <div id="messages"></div>
        <div class="notice" id="notice"></div>
        <div id="suggestions"></div>
        <div id="composer">
            <input id="input" placeholder="输入消息或 /diagnose、/analyze、/execute、/help 命令" />
            <button id="send">发送</button>
        </div>
    </div>

    <script>
        const labels = { today: '今天', yesterday: '昨天', last7Days: '最近7天', older: '更早' };
        let ws;
        let view = { messages: [], pendingBySessionId: {} };
        let groups = null;

        function send(msg) {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify(msg));
            }
        }

        function renderMessages() {
            const el = document.getElementById('messages');
            el.innerHTML = '';
            for (const m of view.messages) {
                const div = document.createElement('div');
                div.className = `msg ${m.role}`;
                div.textContent = m.display;
                el.appendChild(div);
            }
            if (view.isLoading) {
                const div = document.createElement('div');
                div.className = 'msg assistant';
                div.textContent = '…';
                el.appendChild(div);
            }
            el.scrollTop = el.scrollHeight;
            document.getElementById('notice').textContent = view.notice ? view.notice.text : '';
        }

        function renderSessions() {
            const el = document.getElementById('sessions');
            el.innerHTML = '';
            if (!groups) return;
            for (const key of Object.keys(labels)) {
                if (!groups[key].length) continue;
                const header = document.createElement('div');
                header.className = 'group';
                header.textContent = labels[key];
                el.appendChild(header);
                for (const s of groups[key]) {
                    const div = document.createElement('div');
                    div.className = 'session' + (s.id === view.currentSessionId ? ' current' : '');
                    const name = document.createElement('span');
                    name.textContent = s.name;
                    if (view.pendingBySessionId[s.id]) name.className = 'pending';
                    div.appendChild(name);
                    div.onclick = () => send({ type: 'switch_session', session_id: s.id });
                    div.ondblclick = () => {
                        const next = prompt('会话名称', s.name);
                        if (next !== null) send({ type: 'rename_session', session_id: s.id, name: next });
                    };
                    div.oncontextmenu = (e) => {
                        e.preventDefault();
                        if (confirm(`删除会话 "${s.name}"?`)) send({ type: 'delete_session', session_id: s.id });
                    };
                    el.appendChild(div);
                }
            }
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onclose = () => setTimeout(connect, 2000);
            ws.onerror = (err) => console.error('WebSocket error:', err);

            ws.onmessage = (event) => {
                try {
                    const msg = JSON.parse(event.data);
                    if (msg.type === 'view') {
                        view = msg.view;
                        renderMessages();
                        renderSessions();
                    } else if (msg.type === 'sessions') {
                        groups = msg.groups;
                        renderSessions();
                    } else if (msg.type === 'suggestions') {
                        document.getElementById('suggestions').textContent =
                            msg.commands.map((c) => `${c.command} ${c.description}`).join('  ·  ');
                    } else if (msg.type === 'redirect') {
                        window.location.href = msg.path;
                    } else if (msg.type === 'error') {
                        document.getElementById('notice').textContent = msg.message;
                    }
                } catch (e) {
                    console.error('Failed to parse message:', e);
                }
            };
        }

        const input = document.getElementById('input');
        input.addEventListener('input', () => {
            if (input.value.startsWith('/') && !input.value.includes(' ')) {
                send({ type: 'suggest', filter: input.value });
            } else {
                document.getElementById('suggestions').textContent = '';
            }
        });
        function submit() {
            if (view.isLoading) return;
            send({ type: 'submit', text: input.value });
            input.value = '';
            document.getElementById('suggestions').textContent = '';
        }
        input.addEventListener('keydown', (e) => { if (e.key === 'Enter') submit(); });
        document.getElementById('send').onclick = submit;
        document.getElementById('new').onclick = () => send({ type: 'create_session' });

        connect();
    </script>
</body>
</html>
"#;
