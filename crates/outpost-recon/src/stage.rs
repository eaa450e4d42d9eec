//! The stage contract the orchestrator executes.
//!
//! A stage is one named, independently-executable unit of pipeline work.
//! Stages carry no state between invocations: everything an invocation
//! needs arrives in an explicit [`StageContext`], and everything it
//! produces lands as an artifact under the working directory for later
//! stages to read.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ReconError, Result};
use crate::scope::Scope;
use crate::snapshot::DATA_DIR;

use std::path::{Path, PathBuf};

/// Boxed future returned by a stage body.
pub type StageFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Per-invocation inputs for a stage.
///
/// Built fresh by the orchestrator for every stage execution; stages must
/// not rely on anything outside it beyond their own construction-time
/// collaborators (tool paths, store handles).
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The scanned target (apex domain or address expression).
    pub target: String,
    /// The run's working directory; the sole medium stages exchange data
    /// through.
    pub workdir: PathBuf,
    /// Run-wide deadline. Stages check it cooperatively; the orchestrator
    /// never kills a stage.
    pub deadline: Option<tokio::time::Instant>,
    /// In-scope policy every discovered name and address is filtered
    /// through.
    pub scope: Arc<Scope>,
}

impl StageContext {
    /// The artifact subdirectory of the working directory.
    pub fn data_dir(&self) -> PathBuf {
        self.workdir.join(DATA_DIR)
    }

    /// Full path of a named artifact under the data subdirectory.
    pub fn artifact_path(&self, file: &str) -> PathBuf {
        self.data_dir().join(file)
    }

    /// Time left before the run deadline, `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
    }

    /// Fail fast when the run deadline has already passed.
    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(d) if tokio::time::Instant::now() >= d => Err(ReconError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// One named unit of pipeline work.
///
/// Implementations must return a `'static` future: clone whatever they
/// need out of `self` into the async body, since the orchestrator awaits
/// the future on a spawned task for crash isolation.
pub trait Stage: Send + Sync {
    /// Unique name within a registry; also the checkpoint key recorded in
    /// the run registry when the stage completes.
    fn name(&self) -> &'static str;

    fn run(&self, ctx: StageContext) -> StageFuture;
}

/// Ordered collection of stages.
///
/// Registration order is the canonical execution order: selection filters
/// never reorder, they only drop.
#[derive(Default)]
pub struct StageRegistry {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    /// Stage names in canonical order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Optional progress callbacks invoked synchronously from the sequential
/// execution loop. Implementations must not block materially.
pub trait RunObserver: Send + Sync {
    fn stage_started(&self, _name: &str, _index: usize, _total: usize) {}

    fn stage_finished(
        &self,
        _name: &str,
        _index: usize,
        _total: usize,
        _error: Option<&str>,
        _elapsed: Duration,
    ) {
    }
}

/// Read a JSON artifact a stage depends on. A missing file is a
/// [`ReconError::MissingArtifact`] naming the path, so the failure message
/// points at the stage that should have produced it.
pub fn read_required_artifact<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ReconError::MissingArtifact {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Write a JSON artifact, creating the data directory if needed.
pub fn write_artifact<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
