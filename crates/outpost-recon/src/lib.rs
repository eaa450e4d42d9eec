//! outpost-recon: resumable attack-surface recon pipeline.
//!
//! Runs a fixed sequence of scan stages against a target, checkpointing
//! progress through the run registry after every stage so a crashed or
//! partially-failed run can be resumed, and diffs the artifacts of two
//! runs to report what changed.

pub mod config;
pub mod diff;
pub mod error;
pub mod nmap_xml;
pub mod pipeline;
pub mod scope;
pub mod snapshot;
pub mod stage;
pub mod stages;

pub use error::{ReconError, Result};
pub use pipeline::{OutcomeStatus, Pipeline, RunConfig, RunOutcome};
pub use snapshot::Snapshot;
pub use stage::{RunObserver, Stage, StageContext, StageRegistry};
