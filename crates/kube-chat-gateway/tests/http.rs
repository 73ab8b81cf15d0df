//! HTTP gateway against a local mock agent.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use kube_chat_core::{
    ChangeFeed, ChatContext, Command, CommandGateway, DurableStore, GatewayError, StoreError,
    Verb, traits::keys,
};
use kube_chat_gateway::HttpGateway;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

#[derive(Default)]
struct MapStore(Mutex<HashMap<String, String>>);

impl DurableStore for MapStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.0.lock().unwrap().insert(key.into(), value.into());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.0.lock().unwrap().remove(key);
        Ok(())
    }

    fn subscribe(&self) -> ChangeFeed {
        ChangeFeed::new(0, broadcast::channel(1).1)
    }
}

#[derive(Clone, Debug)]
struct Recorded {
    path: &'static str,
    authorization: Option<String>,
    api_key: Option<String>,
    body: Value,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn record(log: &Log, path: &'static str, headers: &HeaderMap, body: Value) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };
    log.lock().unwrap().push(Recorded {
        path,
        authorization: header("authorization"),
        api_key: header("x-openai-key"),
        body,
    });
}

async fn execute(State(log): State<Log>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    record(&log, "/execute", &headers, body);
    Json(json!({ "message": "3 pods running", "status": "success" }))
}

async fn analyze(State(log): State<Log>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    record(&log, "/analyze", &headers, body);
    Json(json!({ "message": "analysis done", "status": "success" }))
}

async fn diagnose(headers: HeaderMap) -> (StatusCode, String) {
    if headers.contains_key("authorization") {
        (StatusCode::INTERNAL_SERVER_ERROR, r#"{"message":"cluster unreachable"}"#.into())
    } else {
        (StatusCode::UNAUTHORIZED, "token expired".into())
    }
}

async fn spawn_agent() -> (String, Log) {
    let log: Log = Arc::default();
    let app = Router::new()
        .route("/execute", post(execute))
        .route("/analyze", post(analyze))
        .route("/diagnose", post(diagnose))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), log)
}

#[tokio::test]
async fn plain_text_is_posted_to_execute_with_credentials() {
    let (url, log) = spawn_agent().await;
    let store = Arc::new(MapStore::default());
    store.set(keys::CREDENTIAL, "jwt-token").unwrap();
    store.set(keys::LEGACY_API_KEY, "sk-legacy").unwrap();
    let gateway = HttpGateway::new(&ChatContext::new(url.clone()), store).unwrap();
    assert_eq!(gateway.base_url(), url.trim_end_matches('/'));

    let reply = gateway
        .send(&Command::execute("pods status"), "qwen-max-latest", "default")
        .await
        .unwrap();
    assert_eq!(reply.message, "3 pods running");

    let recorded = log.lock().unwrap()[0].clone();
    assert_eq!(recorded.path, "/execute");
    assert_eq!(recorded.authorization.as_deref(), Some("Bearer jwt-token"));
    assert_eq!(recorded.api_key.as_deref(), Some("sk-legacy"));
    assert_eq!(
        recorded.body,
        json!({
            "command": "execute pods status",
            "model": "qwen-max-latest",
            "cluster": "default",
            "args": "pods status",
        })
    );
}

#[tokio::test]
async fn help_is_served_by_the_analyzer() {
    let (url, log) = spawn_agent().await;
    let gateway = HttpGateway::new(&ChatContext::new(url), Arc::new(MapStore::default())).unwrap();

    let reply = assert_ok!(
        gateway
            .send(&Command::new(Verb::Help, "diagnose", true), "m", "c")
            .await
    );
    assert_eq!(reply.message, "analysis done");

    let recorded = log.lock().unwrap()[0].clone();
    assert_eq!(recorded.path, "/analyze");
    assert_eq!(recorded.authorization, None);
    assert_eq!(recorded.api_key, None);
}

#[tokio::test]
async fn failures_are_tagged_by_status() {
    let (url, _log) = spawn_agent().await;
    let store = Arc::new(MapStore::default());
    let gateway = HttpGateway::new(&ChatContext::new(url), store.clone()).unwrap();
    let command = Command::new(Verb::Diagnose, "nginx", true);

    let err = assert_err!(gateway.send(&command, "m", "c").await);
    assert!(matches!(err, GatewayError::Auth(ref d) if d.status == Some(401)));

    store.set(keys::CREDENTIAL, "jwt-token").unwrap();
    let err = gateway.send(&command, "m", "c").await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)));
    assert_eq!(err.user_message(), "cluster unreachable");
}

#[tokio::test]
async fn unreachable_agent_gets_friendly_message() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let ctx = ChatContext::new(format!("http://{addr}"));
    let gateway = HttpGateway::new(&ctx, Arc::new(MapStore::default())).unwrap();
    let err = gateway
        .send(&Command::execute("get pods"), "m", "c")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)));
    assert_eq!(err.user_message(), "无法连接到服务器，请检查网络连接");
}
