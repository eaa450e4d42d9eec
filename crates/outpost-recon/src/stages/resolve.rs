//! DNS resolution and dangling-CNAME detection via dnsx.

use std::collections::HashMap;

use serde::Deserialize;

use outpost_core::types::{DomainRecord, ResolutionState};

use crate::config::ToolConfig;
use crate::error::{ReconError, Result};
use crate::snapshot::{DOMAINS_FILE, SUBDOMAINS_FILE};
use crate::stage::{read_required_artifact, write_artifact, Stage, StageContext, StageFuture};
use crate::stages::enumerate::DiscoveredName;
use crate::stages::run_tool;

/// Stage `resolve`: feeds the enumerated names through `dnsx` and writes
/// `data/domains.json`.
///
/// A name whose answer carries a CNAME but resolves to `NXDOMAIN` is
/// marked dangling: the record points at something that no longer exists
/// and may be claimable. Names dnsx omits from its output are unresolved
/// but not dangling.
pub struct ResolveStage {
    tools: ToolConfig,
}

impl ResolveStage {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }
}

impl Stage for ResolveStage {
    fn name(&self) -> &'static str {
        "resolve"
    }

    fn run(&self, ctx: StageContext) -> StageFuture {
        let tools = self.tools.clone();
        Box::pin(async move {
            ctx.check_deadline()?;

            let discovered: Vec<DiscoveredName> =
                read_required_artifact(&ctx.artifact_path(SUBDOMAINS_FILE))?;

            let stdin = discovered
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let args = vec![
                "-silent".to_string(),
                "-json".to_string(),
                "-resp".to_string(),
            ];
            let stdout = run_tool(&ctx, "dnsx", &tools.dnsx_path, &args, Some(stdin)).await?;
            let raw = String::from_utf8_lossy(&stdout);

            let answers = parse_dnsx_lines(&raw)?;
            let records = build_records(&discovered, &answers);
            let dangling = records.iter().filter(|r| r.dangling).count();

            write_artifact(&ctx.artifact_path(DOMAINS_FILE), &records)?;

            tracing::info!(
                target = %ctx.target,
                resolved = records.iter().filter(|r| r.is_resolved()).count(),
                dangling,
                "DNS resolution complete"
            );
            Ok(())
        })
    }
}

/// One JSON line of dnsx output; only the fields the stage consumes.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DnsxAnswer {
    host: String,
    #[serde(default)]
    a: Vec<String>,
    #[serde(default)]
    cname: Vec<String>,
    #[serde(default)]
    status_code: Option<String>,
}

fn parse_dnsx_lines(raw: &str) -> Result<Vec<DnsxAnswer>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| ReconError::ToolOutput {
                tool: "dnsx",
                detail: format!("{e} in line {line:?}"),
            })
        })
        .collect()
}

/// Join the enumerated names with their dnsx answers. Input order is the
/// enumerated (sorted) order, so the artifact stays sorted by name.
fn build_records(discovered: &[DiscoveredName], answers: &[DnsxAnswer]) -> Vec<DomainRecord> {
    let by_host: HashMap<&str, &DnsxAnswer> = answers
        .iter()
        .map(|a| (a.host.trim_end_matches('.'), a))
        .collect();

    discovered
        .iter()
        .map(|d| {
            let answer = by_host.get(d.name.as_str());
            let addresses: Vec<String> = answer.map(|a| a.a.clone()).unwrap_or_default();
            let cname = answer.and_then(|a| a.cname.first().cloned());
            let nxdomain = answer
                .and_then(|a| a.status_code.as_deref())
                .is_some_and(|s| s.eq_ignore_ascii_case("NXDOMAIN"));

            DomainRecord {
                name: d.name.clone(),
                state: if addresses.is_empty() {
                    ResolutionState::Unresolved
                } else {
                    ResolutionState::Resolved
                },
                dangling: cname.is_some() && nxdomain,
                cname,
                addresses,
                sources: d.sources.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered(names: &[&str]) -> Vec<DiscoveredName> {
        names
            .iter()
            .map(|n| DiscoveredName {
                name: n.to_string(),
                sources: vec!["crtsh".to_string()],
            })
            .collect()
    }

    #[test]
    fn parses_dnsx_lines() {
        let raw = concat!(
            r#"{"host":"a.example.com","a":["198.51.100.7"],"status_code":"NOERROR"}"#,
            "\n",
            r#"{"host":"old.example.com","cname":["gone.pages.dev"],"status_code":"NXDOMAIN"}"#,
            "\n",
        );
        let answers = parse_dnsx_lines(raw).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].a, vec!["198.51.100.7"]);
        assert_eq!(answers[1].cname, vec!["gone.pages.dev"]);
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_dnsx_lines("not-json\n").unwrap_err();
        assert!(matches!(err, ReconError::ToolOutput { tool: "dnsx", .. }));
    }

    #[test]
    fn resolved_name_gets_addresses() {
        let answers = parse_dnsx_lines(
            r#"{"host":"a.example.com","a":["198.51.100.7"],"status_code":"NOERROR"}"#,
        )
        .unwrap();
        let records = build_records(&discovered(&["a.example.com"]), &answers);

        assert_eq!(records.len(), 1);
        assert!(records[0].is_resolved());
        assert!(!records[0].dangling);
        assert_eq!(records[0].addresses, vec!["198.51.100.7"]);
        assert_eq!(records[0].sources, vec!["crtsh"]);
    }

    #[test]
    fn nxdomain_cname_is_dangling() {
        let answers = parse_dnsx_lines(
            r#"{"host":"old.example.com","cname":["gone.pages.dev"],"status_code":"NXDOMAIN"}"#,
        )
        .unwrap();
        let records = build_records(&discovered(&["old.example.com"]), &answers);

        assert!(records[0].dangling);
        assert!(!records[0].is_resolved());
        assert_eq!(records[0].cname.as_deref(), Some("gone.pages.dev"));
    }

    #[test]
    fn nxdomain_without_cname_is_not_dangling() {
        let answers =
            parse_dnsx_lines(r#"{"host":"typo.example.com","status_code":"NXDOMAIN"}"#).unwrap();
        let records = build_records(&discovered(&["typo.example.com"]), &answers);
        assert!(!records[0].dangling);
    }

    #[test]
    fn resolving_cname_is_not_dangling() {
        let answers = parse_dnsx_lines(
            r#"{"host":"www.example.com","a":["198.51.100.8"],"cname":["cdn.example.net"],"status_code":"NOERROR"}"#,
        )
        .unwrap();
        let records = build_records(&discovered(&["www.example.com"]), &answers);
        assert!(!records[0].dangling);
        assert!(records[0].is_resolved());
    }

    #[test]
    fn name_missing_from_output_is_unresolved() {
        let records = build_records(&discovered(&["ghost.example.com"]), &[]);
        assert!(!records[0].is_resolved());
        assert!(!records[0].dangling);
        assert!(records[0].addresses.is_empty());
    }

    #[test]
    fn record_order_follows_input_order() {
        let records = build_records(&discovered(&["a.example.com", "b.example.com"]), &[]);
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);
    }
}
