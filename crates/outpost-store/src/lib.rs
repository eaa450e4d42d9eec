//! outpost-store: the durable run registry.
//!
//! The orchestrator checkpoints run metadata through the three-operation
//! [`RunStore`] contract. Two implementations ship here: [`FsRunStore`]
//! keeps one pretty-printed JSON file per run under a root directory, and
//! [`MemoryRunStore`] backs tests and in-process embedding.

pub mod fs;
pub mod mem;

use outpost_core::types::{RunId, RunStatus, ScanRun};

pub use fs::FsRunStore;
pub use mem::MemoryRunStore;

/// Errors from run-registry operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    NotFound(RunId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence contract for run records.
///
/// Implementations own ordering: `list_by_target` must return records
/// newest-first (by `started_at`); callers perform no sorting of their
/// own.
pub trait RunStore: Send + Sync {
    /// Persist a run record, replacing any prior record with the same id.
    fn save(&self, run: &ScanRun) -> Result<(), StoreError>;

    /// All recorded runs for a target, newest first. A target with no
    /// history yields an empty list, not an error.
    fn list_by_target(&self, target: &str) -> Result<Vec<ScanRun>, StoreError>;

    /// Update the status of an existing run. Terminal statuses also stamp
    /// `finished_at`.
    fn update_status(&self, id: RunId, status: RunStatus) -> Result<(), StoreError>;
}
