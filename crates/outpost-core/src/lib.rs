//! outpost-core: Shared types for the outpost recon pipeline.
//!
//! This crate provides the types every other outpost component consumes:
//! - Run records (`ScanRun`) and their lifecycle status
//! - Artifact entity types (domains, host/ports, findings) written by
//!   pipeline stages and diffed between runs
//! - Target slug derivation for filesystem-safe paths

pub mod error;
pub mod target;
pub mod types;

pub use error::InvalidStatus;
pub use types::{RunId, RunStatus, ScanRun};
