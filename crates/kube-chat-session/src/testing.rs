//! Gateways and stores for engine tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use kube_chat_core::{
    ChangeFeed, Command, CommandGateway, DurableStore, ErrorDetail, GatewayError, Reply,
    StoreError,
};
use tokio::sync::{mpsc, oneshot};

use crate::storage::MemoryStore;

#[derive(Debug, Clone)]
pub struct Call {
    pub command: Command,
    pub model: String,
    pub cluster: String,
}

/// Answers immediately from a queue; an empty queue answers "ok".
#[derive(Default)]
pub struct QueueGateway {
    results: Mutex<VecDeque<Result<Reply, GatewayError>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl QueueGateway {
    pub fn push_reply(&self, text: &str) {
        self.results.lock().unwrap().push_back(Ok(Reply::new(text)));
    }

    pub fn push_error(&self, error: GatewayError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandGateway for QueueGateway {
    async fn send(
        &self,
        command: &Command,
        model: &str,
        cluster: &str,
    ) -> Result<Reply, GatewayError> {
        self.calls.lock().unwrap().push(Call {
            command: command.clone(),
            model: model.to_string(),
            cluster: cluster.to_string(),
        });
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Reply::new("ok")))
    }
}

/// A request held open until the test answers it.
pub struct PendingCall {
    pub call: Call,
    responder: oneshot::Sender<Result<Reply, GatewayError>>,
}

impl PendingCall {
    pub fn reply(self, text: &str) {
        let _ = self.responder.send(Ok(Reply::new(text)));
    }

    pub fn fail(self, error: GatewayError) {
        let _ = self.responder.send(Err(error));
    }
}

/// Hands every request to the test and waits for its answer.
pub struct ScriptedGateway {
    calls: mpsc::UnboundedSender<PendingCall>,
}

impl ScriptedGateway {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { calls: tx }, rx)
    }
}

#[async_trait]
impl CommandGateway for ScriptedGateway {
    async fn send(
        &self,
        command: &Command,
        model: &str,
        cluster: &str,
    ) -> Result<Reply, GatewayError> {
        let (tx, rx) = oneshot::channel();
        let pending = PendingCall {
            call: Call {
                command: command.clone(),
                model: model.to_string(),
                cluster: cluster.to_string(),
            },
            responder: tx,
        };
        if self.calls.send(pending).is_err() {
            return Err(GatewayError::Transport(ErrorDetail::friendly("test finished")));
        }
        rx.await
            .unwrap_or_else(|_| Err(GatewayError::Transport(ErrorDetail::friendly("call dropped"))))
    }
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Internal("disk full".into()));
        }
        Ok(())
    }
}

impl DurableStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.remove(key)
    }

    fn subscribe(&self) -> ChangeFeed {
        self.inner.subscribe()
    }
}
