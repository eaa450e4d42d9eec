//! Error types for the outpost-recon crate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    /// Caller misconfiguration: rejected before any side effect.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External tool not found: {tool} (looked at {path})")]
    ToolNotFound { tool: &'static str, path: String },

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("Failed to parse {tool} output: {detail}")]
    ToolOutput { tool: &'static str, detail: String },

    /// An upstream stage did not leave the artifact this stage needs.
    #[error("Missing input artifact {path} (did the producing stage run?)")]
    MissingArtifact { path: PathBuf },

    #[error("Run deadline exceeded")]
    DeadlineExceeded,

    /// A stage body panicked; converted to a regular failure by the
    /// orchestrator's isolation wrapper.
    #[error("stage {stage:?} panicked: {detail}")]
    StagePanicked { stage: &'static str, detail: String },

    #[error("Run registry error: {0}")]
    Store(#[from] outpost_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReconError>;
