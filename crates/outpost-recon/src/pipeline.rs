//! Stage orchestration engine.
//!
//! Runs the selected stages of a registry strictly in registry order,
//! isolating each stage's failures (including panics) so one broken
//! stage never prevents the rest from running. Progress is checkpointed
//! through the run registry after every successful stage, which is what
//! makes a crashed or partially-failed run resumable: a later run with
//! `resume` treats every checkpointed stage as done and skips it.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use outpost_core::target;
use outpost_core::types::{RunId, RunStatus, ScanRun};
use outpost_store::RunStore;

use crate::error::{ReconError, Result};
use crate::scope::Scope;
use crate::snapshot::DATA_DIR;
use crate::stage::{RunObserver, Stage, StageContext, StageRegistry};

/// Caller-supplied parameters for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: String,
    /// Existing working directory to reuse. `None` derives a fresh one
    /// under `output_root` from the target and current time.
    pub workdir: Option<PathBuf>,
    pub output_root: PathBuf,
    /// Allow-list of stage names; empty selects every registered stage.
    pub only: Vec<String>,
    /// Deny-list, applied after the allow-list.
    pub skip: Vec<String>,
    /// Skip stages a prior run of this target already completed.
    pub resume: bool,
    /// Run-wide deadline shared by every stage.
    pub timeout: Option<Duration>,
    /// In-scope policy threaded into every stage context.
    pub scope: Arc<Scope>,
}

impl RunConfig {
    pub fn new(target: &str, output_root: impl Into<PathBuf>) -> Self {
        Self {
            target: target.to_string(),
            workdir: None,
            output_root: output_root.into(),
            only: Vec::new(),
            skip: Vec::new(),
            resume: false,
            timeout: None,
            scope: Arc::new(Scope::default()),
        }
    }
}

/// Caller-facing status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Every attempted stage succeeded.
    Complete,
    /// At least one stage failed, or nothing was attempted at all.
    Partial,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory result of one pipeline run.
///
/// Stage failures live here, not in the orchestrator's error path: once a
/// run is past setup, it always produces an outcome.
#[derive(Debug)]
pub struct RunOutcome {
    pub target: String,
    pub workdir: PathBuf,
    pub run_id: RunId,
    /// Stage names actually executed, in execution order. Stages skipped
    /// by resume are not listed.
    pub attempted: Vec<String>,
    /// Failed stage name mapped to its error message.
    pub failures: BTreeMap<String, String>,
    pub elapsed: Duration,
    pub status: OutcomeStatus,
}

/// The sequential stage orchestrator.
pub struct Pipeline {
    registry: StageRegistry,
    store: Arc<dyn RunStore>,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Pipeline {
    pub fn new(registry: StageRegistry, store: Arc<dyn RunStore>) -> Self {
        Self {
            registry,
            store,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Execute one run.
    ///
    /// Returns `Err` only for configuration and setup problems detected
    /// before any stage executes; per-stage failures are recorded in the
    /// [`RunOutcome`].
    pub async fn run(&self, config: &RunConfig) -> Result<RunOutcome> {
        let run_started = Instant::now();

        if config.target.trim().is_empty() {
            return Err(ReconError::Config("target must not be empty".to_string()));
        }
        if self.registry.is_empty() {
            return Err(ReconError::Config("stage registry is empty".to_string()));
        }

        let selected = self.select_stages(config)?;

        // Workdir resolution, then resume lookup: a resumed run may adopt
        // the prior run's directory, so creation waits until both settle.
        let mut workdir = match &config.workdir {
            Some(dir) => dir.clone(),
            None => config.output_root.join(format!(
                "{}-{}",
                target::slug(&config.target),
                Utc::now().format("%Y%m%d-%H%M%S"),
            )),
        };

        let resumed = if config.resume {
            self.find_resumable(&config.target, &mut workdir)
        } else {
            None
        };

        fs::create_dir_all(workdir.join(DATA_DIR))?;

        let mut record = match resumed {
            Some(mut prior) => {
                tracing::info!(
                    run_id = %prior.id,
                    stages_done = prior.stages_run.len(),
                    "Resuming prior run"
                );
                prior.status = RunStatus::Running;
                if let Err(e) = self.store.update_status(prior.id, RunStatus::Running) {
                    tracing::warn!(run_id = %prior.id, error = %e, "Failed to reopen run record");
                }
                prior
            }
            None => {
                let fresh = ScanRun::begin(&config.target, workdir.clone());
                // Persisted before any stage runs, so a crash mid-stage
                // still leaves a discoverable record for a later resume.
                self.store.save(&fresh)?;
                fresh
            }
        };

        let skip_done: HashSet<String> = record.stages_run.iter().cloned().collect();
        let deadline = config.timeout.map(|t| tokio::time::Instant::now() + t);
        let total = selected.len();

        let mut attempted = Vec::new();
        let mut failures = BTreeMap::new();

        for (index, stage) in selected.iter().enumerate() {
            let name = stage.name();
            if skip_done.contains(name) {
                tracing::info!(stage = name, "Stage completed in prior run, skipping");
                continue;
            }

            if let Some(observer) = &self.observer {
                observer.stage_started(name, index, total);
            }

            let stage_started = Instant::now();
            let ctx = StageContext {
                target: config.target.clone(),
                workdir: workdir.clone(),
                deadline,
                scope: config.scope.clone(),
            };
            let result = run_isolated(stage.clone(), ctx).await;
            let elapsed = stage_started.elapsed();

            attempted.push(name.to_string());

            if let Some(observer) = &self.observer {
                let error = result.as_ref().err().map(|e| e.to_string());
                observer.stage_finished(name, index, total, error.as_deref(), elapsed);
            }

            match result {
                Ok(()) => {
                    tracing::info!(
                        stage = name,
                        duration_ms = elapsed.as_millis() as u64,
                        "Stage complete"
                    );
                    record.mark_stage_done(name);
                    if let Err(e) = self.store.save(&record) {
                        // The stage itself succeeded; a resume after this
                        // may redundantly re-run it, which is acceptable.
                        tracing::warn!(stage = name, error = %e, "Failed to checkpoint stage");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        stage = name,
                        error = %e,
                        duration_ms = elapsed.as_millis() as u64,
                        "Stage failed"
                    );
                    failures.insert(name.to_string(), e.to_string());
                }
            }
        }

        let (durable, status) = if attempted.is_empty() {
            tracing::warn!(
                target = %config.target,
                "Every selected stage was already complete; nothing to do"
            );
            (RunStatus::Failed, OutcomeStatus::Partial)
        } else if failures.is_empty() {
            (RunStatus::Complete, OutcomeStatus::Complete)
        } else {
            (RunStatus::Failed, OutcomeStatus::Partial)
        };

        if let Err(e) = self.store.update_status(record.id, durable) {
            tracing::warn!(run_id = %record.id, error = %e, "Failed to persist final status");
        }

        tracing::info!(
            run_id = %record.id,
            target = %config.target,
            status = %status,
            attempted = attempted.len(),
            failed = failures.len(),
            duration_ms = run_started.elapsed().as_millis() as u64,
            "Run finished"
        );

        Ok(RunOutcome {
            target: config.target.clone(),
            workdir,
            run_id: record.id,
            attempted,
            failures,
            elapsed: run_started.elapsed(),
            status,
        })
    }

    /// Filter the registry by the allow- and deny-lists, preserving
    /// registry order. Empty selection is a configuration error raised
    /// before any side effect.
    fn select_stages(&self, config: &RunConfig) -> Result<Vec<Arc<dyn Stage>>> {
        let selected: Vec<Arc<dyn Stage>> = self
            .registry
            .iter()
            .filter(|stage| {
                let name = stage.name();
                (config.only.is_empty() || config.only.iter().any(|s| s == name))
                    && !config.skip.iter().any(|s| s == name)
            })
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(ReconError::Config(format!(
                "no stages selected (registry has: {})",
                self.registry.names().join(", ")
            )));
        }
        Ok(selected)
    }

    /// Locate a prior run to resume. Prefers a record whose workdir
    /// matches the resolved one, falls back to the newest run for the
    /// target (adopting its workdir), and degrades to a fresh run when
    /// the lookup fails or finds nothing.
    fn find_resumable(&self, target_name: &str, workdir: &mut PathBuf) -> Option<ScanRun> {
        let runs = match self.store.list_by_target(target_name) {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(error = %e, "Resume lookup failed, starting fresh run");
                return None;
            }
        };

        if let Some(matching) = runs.iter().find(|r| r.workdir == *workdir) {
            return Some(matching.clone());
        }

        // list_by_target is newest-first per the store contract.
        let newest = runs.into_iter().next()?;
        tracing::warn!(
            resolved = %workdir.display(),
            adopted = %newest.workdir.display(),
            "No prior run matches the resolved directory; resuming the most recent run in its own directory"
        );
        *workdir = newest.workdir.clone();
        Some(newest)
    }
}

/// Execute one stage body on its own task so a panic inside it becomes a
/// regular stage failure instead of tearing the process down.
async fn run_isolated(stage: Arc<dyn Stage>, ctx: StageContext) -> Result<()> {
    let name = stage.name();
    let handle = tokio::spawn(async move { stage.run(ctx).await });
    match handle.await {
        Ok(result) => result,
        Err(join_err) => {
            let detail = if join_err.is_panic() {
                let payload = join_err.into_panic();
                payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string())
            } else {
                join_err.to_string()
            };
            Err(ReconError::StagePanicked {
                stage: name,
                detail,
            })
        }
    }
}
