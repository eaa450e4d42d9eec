//! Template-based vulnerability scanning of live hosts via nuclei.

use serde::Deserialize;

use outpost_core::types::{FindingRecord, HostRecord, Severity};

use crate::config::ToolConfig;
use crate::error::{ReconError, Result};
use crate::snapshot::{FINDINGS_FILE, HOSTS_FILE};
use crate::stage::{read_required_artifact, write_artifact, Stage, StageContext, StageFuture};
use crate::stages::run_tool;

/// Stage `vulnscan`: feeds every live host's display name to `nuclei`
/// and writes `data/findings.json`.
///
/// A run with no live hosts writes an empty finding list and succeeds.
pub struct VulnscanStage {
    tools: ToolConfig,
}

impl VulnscanStage {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }
}

impl Stage for VulnscanStage {
    fn name(&self) -> &'static str {
        "vulnscan"
    }

    fn run(&self, ctx: StageContext) -> StageFuture {
        let tools = self.tools.clone();
        Box::pin(async move {
            ctx.check_deadline()?;

            let hosts: Vec<HostRecord> = read_required_artifact(&ctx.artifact_path(HOSTS_FILE))?;
            let targets = scan_targets(&hosts);

            if targets.is_empty() {
                tracing::info!(target = %ctx.target, "No live hosts to scan");
                write_artifact(&ctx.artifact_path(FINDINGS_FILE), &Vec::<FindingRecord>::new())?;
                return Ok(());
            }

            let args = vec![
                "-silent".to_string(),
                "-jsonl".to_string(),
                "-severity".to_string(),
                tools.nuclei_severity.clone(),
            ];
            let stdin = targets.join("\n");
            let stdout = run_tool(&ctx, "nuclei", &tools.nuclei_path, &args, Some(stdin)).await?;
            let raw = String::from_utf8_lossy(&stdout);

            let mut findings = parse_nuclei_lines(&raw)?;
            findings.sort_by(|a, b| (&a.template_id, &a.host).cmp(&(&b.template_id, &b.host)));

            write_artifact(&ctx.artifact_path(FINDINGS_FILE), &findings)?;

            tracing::info!(
                target = %ctx.target,
                hosts_scanned = targets.len(),
                findings = findings.len(),
                "Vulnerability scan complete"
            );
            Ok(())
        })
    }
}

/// Display names of the live hosts, deduplicated, in host order.
fn scan_targets(hosts: &[HostRecord]) -> Vec<String> {
    let mut targets = Vec::new();
    for host in hosts {
        let name = host.display_name().to_string();
        if !targets.contains(&name) {
            targets.push(name);
        }
    }
    targets
}

#[derive(Debug, Deserialize)]
struct NucleiLine {
    #[serde(rename = "template-id")]
    template_id: String,
    host: String,
    #[serde(rename = "matched-at", default)]
    matched_at: Option<String>,
    info: NucleiInfo,
}

#[derive(Debug, Deserialize)]
struct NucleiInfo {
    name: String,
    #[serde(default)]
    severity: Option<String>,
}

fn parse_nuclei_lines(raw: &str) -> Result<Vec<FindingRecord>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parsed: NucleiLine =
                serde_json::from_str(line).map_err(|e| ReconError::ToolOutput {
                    tool: "nuclei",
                    detail: format!("{e} in line {line:?}"),
                })?;
            Ok(FindingRecord {
                template_id: parsed.template_id,
                host: parsed.host,
                name: parsed.info.name,
                severity: parse_severity(parsed.info.severity.as_deref()),
                matched_at: parsed.matched_at,
            })
        })
        .collect()
}

fn parse_severity(raw: Option<&str>) -> Severity {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("critical") => Severity::Critical,
        Some("high") => Severity::High,
        Some("medium") => Severity::Medium,
        Some("low") => Severity::Low,
        Some("info") => Severity::Info,
        _ => Severity::Unknown,
    }
}
