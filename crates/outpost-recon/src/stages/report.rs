//! Markdown report rendering.

use std::fmt::Write as _;
use std::fs;
use std::io;

use crate::diff::SnapshotDiff;
use crate::error::Result;
use crate::snapshot::{Snapshot, DIFF_FILE, REPORT_FILE};
use crate::stage::{Stage, StageContext, StageFuture};

/// Stage `report`: renders `report.md` at the working directory root
/// from the run's artifacts.
///
/// The changes section appears only when the diff stage left
/// `data/diff.json`; running with `--skip diff` still yields a report.
pub struct ReportStage;

impl Stage for ReportStage {
    fn name(&self) -> &'static str {
        "report"
    }

    fn run(&self, ctx: StageContext) -> StageFuture {
        Box::pin(async move {
            ctx.check_deadline()?;

            let snapshot = Snapshot::load(&ctx.workdir)?;
            let diff = read_optional_diff(&ctx)?;

            let markdown = render(&ctx.target, &snapshot, diff.as_ref());
            let path = ctx.workdir.join(REPORT_FILE);
            fs::write(&path, markdown)?;

            tracing::info!(
                target = %ctx.target,
                path = %path.display(),
                "Report rendered"
            );
            Ok(())
        })
    }
}

/// Like the snapshot loader: absent diff is fine, corrupt diff is not.
fn read_optional_diff(ctx: &StageContext) -> Result<Option<SnapshotDiff>> {
    match fs::read_to_string(ctx.artifact_path(DIFF_FILE)) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn render(target: &str, snapshot: &Snapshot, diff: Option<&SnapshotDiff>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Recon report: {target}\n");
    let _ = writeln!(
        out,
        "{} domains, {} hosts, {} findings.\n",
        snapshot.domains.len(),
        snapshot.hosts.len(),
        snapshot.findings.len(),
    );

    render_domains(&mut out, snapshot);
    render_ports(&mut out, snapshot);
    render_findings(&mut out, snapshot);
    if let Some(diff) = diff {
        render_changes(&mut out, diff);
    }

    out
}

fn render_domains(out: &mut String, snapshot: &Snapshot) {
    let _ = writeln!(out, "## Domains\n");
    if snapshot.domains.is_empty() {
        let _ = writeln!(out, "No domains discovered.\n");
        return;
    }

    let _ = writeln!(out, "| Name | State | Dangling | Addresses |");
    let _ = writeln!(out, "|------|-------|----------|-----------|");
    for d in &snapshot.domains {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            d.name,
            if d.is_resolved() { "resolved" } else { "unresolved" },
            if d.dangling { "yes" } else { "no" },
            d.addresses.join(", "),
        );
    }
    let _ = writeln!(out);
}

fn render_ports(out: &mut String, snapshot: &Snapshot) {
    let _ = writeln!(out, "## Open ports\n");
    let total: usize = snapshot.hosts.iter().map(|h| h.ports.len()).sum();
    if total == 0 {
        let _ = writeln!(out, "No open ports.\n");
        return;
    }

    let _ = writeln!(out, "| Host | Address | Port | Service |");
    let _ = writeln!(out, "|------|---------|------|---------|");
    for host in &snapshot.hosts {
        for port in &host.ports {
            let _ = writeln!(
                out,
                "| {} | {} | {}/{} | {} |",
                host.display_name(),
                host.address,
                port.number,
                port.protocol,
                port.service.as_deref().unwrap_or("-"),
            );
        }
    }
    let _ = writeln!(out);
}

fn render_findings(out: &mut String, snapshot: &Snapshot) {
    let _ = writeln!(out, "## Findings\n");
    if snapshot.findings.is_empty() {
        let _ = writeln!(out, "No findings.\n");
        return;
    }

    let _ = writeln!(out, "| Severity | Finding | Host | Template |");
    let _ = writeln!(out, "|----------|---------|------|----------|");
    for f in &snapshot.findings {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            f.severity, f.name, f.host, f.template_id,
        );
    }
    let _ = writeln!(out);
}

fn render_changes(out: &mut String, diff: &SnapshotDiff) {
    let _ = writeln!(out, "## Changes since previous run\n");
    if diff.is_empty() {
        let _ = writeln!(out, "No changes.\n");
        return;
    }

    let mut bullet_list = |title: &str, items: Vec<String>| {
        if items.is_empty() {
            return;
        }
        let _ = writeln!(out, "### {title}\n");
        for item in items {
            let _ = writeln!(out, "- {item}");
        }
        let _ = writeln!(out);
    };

    bullet_list(
        "New domains",
        diff.new_domains.iter().map(|d| d.name.clone()).collect(),
    );
    bullet_list(
        "Removed domains",
        diff.removed_domains.iter().map(|d| d.name.clone()).collect(),
    );
    bullet_list(
        "Newly dangling",
        diff.newly_dangling
            .iter()
            .map(|d| {
                format!(
                    "{} (CNAME {})",
                    d.name,
                    d.cname.as_deref().unwrap_or("unknown")
                )
            })
            .collect(),
    );
    bullet_list(
        "No longer dangling",
        diff.resolved_dangling.iter().map(|d| d.name.clone()).collect(),
    );
    bullet_list(
        "Opened ports",
        diff.opened_ports
            .iter()
            .map(|p| format!("{}:{}/{} ({})", p.host, p.port, p.protocol, p.hostname))
            .collect(),
    );
    bullet_list(
        "Closed ports",
        diff.closed_ports
            .iter()
            .map(|p| format!("{}:{}/{} ({})", p.host, p.port, p.protocol, p.hostname))
            .collect(),
    );
    bullet_list(
        "New findings",
        diff.new_findings
            .iter()
            .map(|f| format!("[{}] {} on {}", f.severity, f.template_id, f.host))
            .collect(),
    );
    bullet_list(
        "Resolved findings",
        diff.resolved_findings
            .iter()
            .map(|f| format!("[{}] {} on {}", f.severity, f.template_id, f.host))
            .collect(),
    );
}
