//! File-system backed run registry.
//!
//! Run records are stored as JSON files organized per target:
//!
//! ```text
//! {root}/
//!   example-com-1a2b3c4d/
//!     9f8d…-….json
//! ```
//!
//! The per-target directory name is the target slug, so `list_by_target`
//! is a single directory read rather than a full tree walk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use outpost_core::target;
use outpost_core::types::{RunId, RunStatus, ScanRun};

use crate::{RunStore, StoreError};

/// Run registry rooted at a directory on the local filesystem.
pub struct FsRunStore {
    root: PathBuf,
}

impl FsRunStore {
    /// Create a store rooted at the given directory, creating it if it
    /// does not exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn run_path(&self, run: &ScanRun) -> PathBuf {
        self.root
            .join(target::slug(&run.target))
            .join(format!("{}.json", run.id))
    }

    /// Locate a record file by run id, searching across targets.
    fn find_path(&self, id: RunId) -> Result<PathBuf, StoreError> {
        let filename = format!("{id}.json");
        find_file_recursive(&self.root, &filename).ok_or(StoreError::NotFound(id))
    }

    fn load(&self, path: &Path) -> Result<ScanRun, StoreError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl RunStore for FsRunStore {
    fn save(&self, run: &ScanRun) -> Result<(), StoreError> {
        let path = self.run_path(run);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(run)?;
        fs::write(&path, json)?;

        tracing::debug!(
            run_id = %run.id,
            target = %run.target,
            path = %path.display(),
            "Run record saved"
        );

        Ok(())
    }

    fn list_by_target(&self, target_name: &str) -> Result<Vec<ScanRun>, StoreError> {
        let dir = self.root.join(target::slug(target_name));
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                runs.push(self.load(&path)?);
            }
        }

        // Newest first, per the RunStore contract.
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(runs)
    }

    fn update_status(&self, id: RunId, status: RunStatus) -> Result<(), StoreError> {
        let path = self.find_path(id)?;
        let mut run = self.load(&path)?;

        run.status = status;
        if status.is_terminal() {
            run.finished_at = Some(Utc::now());
        }

        let json = serde_json::to_string_pretty(&run)?;
        fs::write(&path, json)?;

        tracing::debug!(run_id = %id, status = %status, "Run status updated");

        Ok(())
    }
}

/// Recursively find a file by name.
fn find_file_recursive(dir: &Path, filename: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_recursive(&path, filename) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
            return Some(path);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration, Utc};

    use super::*;

    fn run_for(target: &str, workdir: &str) -> ScanRun {
        ScanRun::begin(target, PathBuf::from(workdir))
    }

    #[test]
    fn save_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();

        let mut run = run_for("example.com", "scans/example-1");
        run.mark_stage_done("enumerate");
        store.save(&run).unwrap();

        let listed = store.list_by_target("example.com").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, run.id);
        assert_eq!(listed[0].stages_run, vec!["enumerate"]);
    }

    #[test]
    fn list_unknown_target_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();
        assert!(store.list_by_target("nowhere.example").unwrap().is_empty());
    }

    #[test]
    fn list_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();

        let mut old = run_for("example.com", "scans/old");
        old.started_at = Utc::now() - Duration::hours(2);
        let mut mid = run_for("example.com", "scans/mid");
        mid.started_at = Utc::now() - Duration::hours(1);
        let new = run_for("example.com", "scans/new");

        // Insertion order is deliberately scrambled.
        store.save(&mid).unwrap();
        store.save(&new).unwrap();
        store.save(&old).unwrap();

        let listed = store.list_by_target("example.com").unwrap();
        let workdirs: Vec<_> = listed.iter().map(|r| r.workdir.clone()).collect();
        assert_eq!(
            workdirs,
            vec![
                PathBuf::from("scans/new"),
                PathBuf::from("scans/mid"),
                PathBuf::from("scans/old"),
            ]
        );
    }

    #[test]
    fn targets_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();

        store.save(&run_for("a.example", "scans/a")).unwrap();
        store.save(&run_for("b.example", "scans/b")).unwrap();

        assert_eq!(store.list_by_target("a.example").unwrap().len(), 1);
        assert_eq!(store.list_by_target("b.example").unwrap().len(), 1);
    }

    #[test]
    fn update_status_stamps_finished_at_on_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();

        let run = run_for("example.com", "scans/example-1");
        store.save(&run).unwrap();

        store.update_status(run.id, RunStatus::Complete).unwrap();

        let listed = store.list_by_target("example.com").unwrap();
        assert_eq!(listed[0].status, RunStatus::Complete);
        assert!(listed[0].finished_at.is_some());
    }

    #[test]
    fn update_status_running_leaves_finished_at_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();

        let run = run_for("example.com", "scans/example-1");
        store.save(&run).unwrap();
        store.update_status(run.id, RunStatus::Running).unwrap();

        let listed = store.list_by_target("example.com").unwrap();
        assert_eq!(listed[0].status, RunStatus::Running);
        assert!(listed[0].finished_at.is_none());
    }

    #[test]
    fn update_status_unknown_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();

        let result = store.update_status(RunId::new(), RunStatus::Failed);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn save_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();

        let mut run = run_for("example.com", "scans/example-1");
        store.save(&run).unwrap();
        run.mark_stage_done("enumerate");
        run.mark_stage_done("resolve");
        store.save(&run).unwrap();

        let listed = store.list_by_target("example.com").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].stages_run, vec!["enumerate", "resolve"]);
    }
}
