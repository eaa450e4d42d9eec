//! Core domain types for the outpost pipeline.
//!
//! Two families live here: the durable run record the orchestrator
//! checkpoints through the run registry, and the artifact entities the
//! stages write under a run's working directory (and the diff engine
//! compares between runs).

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidStatus;

// ── Run records ───────────────────────────────────────────────────

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a run record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    /// Whether this status ends a run's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// Durable metadata for one pipeline run.
///
/// Created at `running` before the first stage executes and updated after
/// every successful stage, so `stages_run` always reflects exactly the
/// stages that completed. A later resumed run treats every name in
/// `stages_run` as already done.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: RunId,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub workdir: PathBuf,
    /// Stage names completed so far, in completion order, deduplicated.
    #[serde(default)]
    pub stages_run: Vec<String>,
}

impl ScanRun {
    /// Start a fresh record at `running` status.
    pub fn begin(target: &str, workdir: PathBuf) -> Self {
        Self {
            id: RunId::new(),
            target: target.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            workdir,
            stages_run: Vec::new(),
        }
    }

    /// Record a stage as completed. Idempotent: re-marking a stage that is
    /// already present leaves the list unchanged.
    pub fn mark_stage_done(&mut self, stage: &str) {
        if !self.stages_run.iter().any(|s| s == stage) {
            self.stages_run.push(stage.to_string());
        }
    }

    /// Whether a stage is recorded as completed.
    pub fn stage_done(&self, stage: &str) -> bool {
        self.stages_run.iter().any(|s| s == stage)
    }
}

// ── Artifact entities ─────────────────────────────────────────────

/// DNS resolution outcome for a discovered name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    Resolved,
    Unresolved,
}

/// A discovered name (the target apex or one of its subdomains) with its
/// resolution outcome.
///
/// A record is `dangling` when the name carries a CNAME that no longer
/// resolves — the classic takeover candidate shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainRecord {
    pub name: String,
    pub state: ResolutionState,
    #[serde(default)]
    pub dangling: bool,
    #[serde(default)]
    pub cname: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Discovery sources that reported this name (e.g. "subfinder").
    #[serde(default)]
    pub sources: Vec<String>,
}

impl DomainRecord {
    pub fn is_resolved(&self) -> bool {
        self.state == ResolutionState::Resolved
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// One open port on a scanned host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortRecord {
    pub number: u16,
    pub protocol: Protocol,
    #[serde(default)]
    pub service: Option<String>,
}

/// A scanned host address with its open ports and the discovered names
/// that resolve to it. The first associated name is the display hostname.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRecord {
    pub address: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
}

impl HostRecord {
    /// The name to show for this host: first associated domain, falling
    /// back to the raw address.
    pub fn display_name(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or(&self.address)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
    Unknown,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One template match from the vulnerability scan stage.
///
/// Identity for diffing is the (template_id, host) pair: a finding that
/// appears on a new host is a new finding, not a moved one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindingRecord {
    pub template_id: String,
    pub host: String,
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub matched_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Complete,
            RunStatus::Failed,
        ] {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn run_status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Complete.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }

    #[test]
    fn mark_stage_done_deduplicates() {
        let mut run = ScanRun::begin("example.com", PathBuf::from("/tmp/w"));
        run.mark_stage_done("enumerate");
        run.mark_stage_done("resolve");
        run.mark_stage_done("enumerate");

        assert_eq!(run.stages_run, vec!["enumerate", "resolve"]);
        assert!(run.stage_done("resolve"));
        assert!(!run.stage_done("portscan"));
    }

    #[test]
    fn scan_run_serialization_roundtrip() {
        let mut run = ScanRun::begin("example.com", PathBuf::from("scans/example"));
        run.mark_stage_done("enumerate");

        let json = serde_json::to_string(&run).unwrap();
        let back: ScanRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, run.id);
        assert_eq!(back.target, "example.com");
        assert_eq!(back.status, RunStatus::Running);
        assert_eq!(back.stages_run, vec!["enumerate"]);
    }

    #[test]
    fn host_display_name_falls_back_to_address() {
        let mut host = HostRecord {
            address: "203.0.113.10".to_string(),
            domains: vec![],
            ports: vec![],
        };
        assert_eq!(host.display_name(), "203.0.113.10");

        host.domains.push("web.example.com".to_string());
        host.domains.push("cdn.example.com".to_string());
        assert_eq!(host.display_name(), "web.example.com");
    }

    #[test]
    fn domain_record_defaults_on_deserialize() {
        let record: DomainRecord =
            serde_json::from_str(r#"{"name":"a.example.com","state":"resolved"}"#).unwrap();
        assert!(!record.dangling);
        assert!(record.cname.is_none());
        assert!(record.addresses.is_empty());
        assert!(record.is_resolved());
    }
}
