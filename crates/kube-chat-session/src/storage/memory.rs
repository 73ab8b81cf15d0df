//! In-memory durable store.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use kube_chat_core::{ChangeFeed, DurableStore, StoreError};

use super::ChangeHub;

/// In-memory store.
///
/// Useful for tests and single-process deployments.
/// Data is lost on restart.
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
    hub: Arc<ChangeHub>,
    origin: u64,
}

impl MemoryStore {
    /// Create a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        let hub = Arc::new(ChangeHub::new());
        let origin = hub.register();
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            hub,
            origin,
        }
    }

    /// Open another handle onto the same data, as a second tab would.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            hub: Arc::clone(&self.hub),
            origin: self.hub.register(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .data
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        self.hub.notify(key, self.origin);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = self
            .data
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .remove(key);
        if removed.is_some() {
            self.hub.notify(key, self.origin);
        }
        Ok(())
    }

    fn subscribe(&self) -> ChangeFeed {
        self.hub.subscribe(self.origin)
    }
}
