//! Session orchestration and storage for the agent chat client.
//!
//! Provides:
//! - `ConversationEngine` - Submission, reconciliation and view projection
//! - `SessionRepository` - Durable session collection
//! - `PendingTracker` - Per-session in-flight requests
//! - Storage implementations (memory, file)

pub mod engine;
pub mod expiry;
pub mod naming;
pub mod recency;
pub mod repository;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod tracker;

pub use engine::{ConversationEngine, EngineError, SubmitOutcome, spawn_config_listener};
pub use expiry::SessionExpiry;
pub use recency::{RecencyGroups, SessionSummary, group_by_recency_at};
pub use repository::{RepositoryError, SessionExport, SessionRepository, SwitchOutcome};
#[cfg(feature = "file")]
pub use storage::FileStore;
#[cfg(feature = "memory")]
pub use storage::MemoryStore;
pub use tracker::{PendingTracker, SubmissionPhase};
