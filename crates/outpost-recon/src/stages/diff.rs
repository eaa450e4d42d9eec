//! The diff stage: compares the current run's artifacts against the
//! previous run of the same target.

use std::sync::Arc;

use outpost_store::RunStore;

use crate::diff as engine;
use crate::snapshot::{Snapshot, DIFF_FILE};
use crate::stage::{write_artifact, Stage, StageContext, StageFuture};

/// Stage `diff`: loads the current snapshot, locates the previous run
/// through the run registry and writes the computed delta to
/// `data/diff.json`.
///
/// The previous run is the newest record whose working directory differs
/// from the current one, regardless of its final status — a partially
/// failed run still holds comparable artifacts for the stages that did
/// complete. With no prior run the comparison baseline is an empty
/// snapshot, so a first run reports its whole surface as new. A corrupt
/// previous artifact fails the stage; an absent one does not.
pub struct DiffStage {
    store: Arc<dyn RunStore>,
}

impl DiffStage {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

impl Stage for DiffStage {
    fn name(&self) -> &'static str {
        "diff"
    }

    fn run(&self, ctx: StageContext) -> StageFuture {
        let store = self.store.clone();
        Box::pin(async move {
            ctx.check_deadline()?;

            let current = Snapshot::load(&ctx.workdir)?;

            // Unlike the orchestrator's resume lookup, a registry error
            // here fails the stage: without history the diff is
            // meaningless, not merely un-resumable.
            let runs = store.list_by_target(&ctx.target)?;
            let previous = match runs.iter().find(|r| r.workdir != ctx.workdir) {
                Some(prior) => {
                    tracing::info!(
                        previous_run = %prior.id,
                        previous_dir = %prior.workdir.display(),
                        "Comparing against previous run"
                    );
                    Snapshot::load(&prior.workdir)?
                }
                None => {
                    tracing::info!(target = %ctx.target, "No previous run, using empty baseline");
                    Snapshot::empty()
                }
            };

            let diff = engine::compute(&current, &previous);
            write_artifact(&ctx.artifact_path(DIFF_FILE), &diff)?;

            tracing::info!(
                target = %ctx.target,
                new_domains = diff.new_domains.len(),
                removed_domains = diff.removed_domains.len(),
                opened_ports = diff.opened_ports.len(),
                closed_ports = diff.closed_ports.len(),
                new_findings = diff.new_findings.len(),
                resolved_findings = diff.resolved_findings.len(),
                newly_dangling = diff.newly_dangling.len(),
                domains_current = diff.summary.domains_current,
                domains_previous = diff.summary.domains_previous,
                "Snapshot diff complete"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use outpost_core::types::ScanRun;
    use outpost_store::MemoryRunStore;

    use crate::diff::SnapshotDiff;
    use crate::error::ReconError;
    use crate::scope::Scope;
    use crate::snapshot::{DATA_DIR, DOMAINS_FILE};

    use super::*;

    fn write_domains(workdir: &Path, json: &str) {
        let data = workdir.join(DATA_DIR);
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join(DOMAINS_FILE), json).unwrap();
    }

    fn context(workdir: &Path) -> StageContext {
        StageContext {
            target: "example.com".to_string(),
            workdir: workdir.to_path_buf(),
            deadline: None,
            scope: Arc::new(Scope::default()),
        }
    }

    fn read_diff(workdir: &Path) -> SnapshotDiff {
        let json = fs::read_to_string(workdir.join(DATA_DIR).join(DIFF_FILE)).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn first_run_diffs_against_empty_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = tmp.path().join("run-1");
        write_domains(&workdir, r#"[{"name":"a.example.com","state":"resolved"}]"#);

        let store = Arc::new(MemoryRunStore::new());
        store
            .save(&ScanRun::begin("example.com", workdir.clone()))
            .unwrap();

        DiffStage::new(store).run(context(&workdir)).await.unwrap();

        let diff = read_diff(&workdir);
        assert_eq!(diff.new_domains.len(), 1);
        assert_eq!(diff.summary.domains_previous, 0);
    }

    #[tokio::test]
    async fn compares_against_newest_run_in_a_different_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let prev_dir = tmp.path().join("run-1");
        let cur_dir = tmp.path().join("run-2");
        write_domains(
            &prev_dir,
            r#"[{"name":"a.example.com","state":"resolved"},
                {"name":"c.example.com","state":"unresolved","dangling":true}]"#,
        );
        write_domains(
            &cur_dir,
            r#"[{"name":"a.example.com","state":"resolved"},
                {"name":"b.example.com","state":"unresolved","dangling":true}]"#,
        );

        let store = Arc::new(MemoryRunStore::new());
        let mut prev_run = ScanRun::begin("example.com", prev_dir);
        prev_run.started_at -= chrono::Duration::hours(1);
        store.save(&prev_run).unwrap();
        // The current run's own record must not be chosen as baseline.
        store
            .save(&ScanRun::begin("example.com", cur_dir.clone()))
            .unwrap();

        DiffStage::new(store).run(context(&cur_dir)).await.unwrap();

        let diff = read_diff(&cur_dir);
        assert_eq!(diff.new_domains[0].name, "b.example.com");
        assert_eq!(diff.removed_domains[0].name, "c.example.com");
        assert_eq!(diff.newly_dangling[0].name, "b.example.com");
        assert_eq!(diff.resolved_dangling[0].name, "c.example.com");
    }

    #[tokio::test]
    async fn corrupt_previous_snapshot_fails_the_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let prev_dir = tmp.path().join("run-1");
        let cur_dir = tmp.path().join("run-2");
        write_domains(&prev_dir, "{corrupt");
        write_domains(&cur_dir, "[]");

        let store = Arc::new(MemoryRunStore::new());
        let mut prev_run = ScanRun::begin("example.com", prev_dir);
        prev_run.started_at -= chrono::Duration::hours(1);
        store.save(&prev_run).unwrap();

        let err = DiffStage::new(store)
            .run(context(&cur_dir))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Json(_)));
    }

    #[tokio::test]
    async fn absent_previous_artifacts_are_an_empty_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        // Prior run directory exists in the registry but was wiped.
        let prev_dir = tmp.path().join("run-gone");
        let cur_dir = tmp.path().join("run-2");
        write_domains(&cur_dir, r#"[{"name":"a.example.com","state":"resolved"}]"#);

        let store = Arc::new(MemoryRunStore::new());
        let mut prev_run = ScanRun::begin("example.com", prev_dir);
        prev_run.started_at -= chrono::Duration::hours(1);
        store.save(&prev_run).unwrap();

        DiffStage::new(store).run(context(&cur_dir)).await.unwrap();
        let diff = read_diff(&cur_dir);
        assert_eq!(diff.new_domains.len(), 1);
    }
}
