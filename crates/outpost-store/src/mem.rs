//! In-memory run registry for tests and in-process embedding.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use outpost_core::types::{RunId, RunStatus, ScanRun};

use crate::{RunStore, StoreError};

/// Mutex-guarded in-memory implementation of [`RunStore`].
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<Vec<ScanRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, unordered. Test helper.
    pub fn all(&self) -> Vec<ScanRun> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl RunStore for MemoryRunStore {
    fn save(&self, run: &ScanRun) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
        Ok(())
    }

    fn list_by_target(&self, target: &str) -> Result<Vec<ScanRun>, StoreError> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matched: Vec<ScanRun> =
            runs.iter().filter(|r| r.target == target).cloned().collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matched)
    }

    fn update_status(&self, id: RunId, status: RunStatus) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;

        run.status = status;
        if status.is_terminal() {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}
