//! Durable store adapters.
//!
//! Handles opened from the same store share data. Each handle stands for one
//! execution context and only hears about writes made through the others.

use std::sync::atomic::{AtomicU64, Ordering};

use kube_chat_core::{ChangeFeed, StoreChange};
use tokio::sync::broadcast;

#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "file")]
pub use file::FileStore;
#[cfg(feature = "memory")]
pub use memory::MemoryStore;

/// Change fan-out shared by all handles of one store.
pub(crate) struct ChangeHub {
    sender: broadcast::Sender<StoreChange>,
    next_origin: AtomicU64,
}

impl ChangeHub {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender,
            next_origin: AtomicU64::new(1),
        }
    }

    /// Allocate an origin id for a new handle.
    pub(crate) fn register(&self) -> u64 {
        self.next_origin.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn notify(&self, key: &str, origin: u64) {
        // No receivers is fine.
        let _ = self.sender.send(StoreChange {
            key: key.to_string(),
            origin,
        });
    }

    pub(crate) fn subscribe(&self, origin: u64) -> ChangeFeed {
        ChangeFeed::new(origin, self.sender.subscribe())
    }
}
