//! Passive subdomain enumeration via subfinder.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ToolConfig;
use crate::error::{ReconError, Result};
use crate::scope::Scope;
use crate::snapshot::SUBDOMAINS_FILE;
use crate::stage::{write_artifact, Stage, StageContext, StageFuture};
use crate::stages::run_tool;

/// One discovered name with the sources that reported it. The artifact
/// the resolve stage consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredName {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Stage `enumerate`: runs `subfinder` against the target and writes the
/// in-scope, deduplicated name list to `data/subdomains.json`. The target
/// apex is always included even when no source reports it.
pub struct EnumerateStage {
    tools: ToolConfig,
}

impl EnumerateStage {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }
}

impl Stage for EnumerateStage {
    fn name(&self) -> &'static str {
        "enumerate"
    }

    fn run(&self, ctx: StageContext) -> StageFuture {
        let tools = self.tools.clone();
        Box::pin(async move {
            ctx.check_deadline()?;

            let args = vec![
                "-d".to_string(),
                ctx.target.clone(),
                "-all".to_string(),
                "-silent".to_string(),
                "-json".to_string(),
            ];
            let stdout = run_tool(&ctx, "subfinder", &tools.subfinder_path, &args, None).await?;
            let raw = String::from_utf8_lossy(&stdout);

            let discovered = parse_subfinder_lines(&raw)?;
            let names = collect_names(&ctx.target, discovered, &ctx.scope);

            write_artifact(&ctx.artifact_path(SUBDOMAINS_FILE), &names)?;

            tracing::info!(
                target = %ctx.target,
                names = names.len(),
                "Subdomain enumeration complete"
            );
            Ok(())
        })
    }
}

#[derive(Debug, Deserialize)]
struct SubfinderLine {
    host: String,
    #[serde(default)]
    source: Option<String>,
}

/// Parse subfinder's JSON-lines output. Blank lines are skipped; a
/// malformed line is a tool-output error, not silently dropped.
fn parse_subfinder_lines(raw: &str) -> Result<Vec<(String, Option<String>)>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parsed: SubfinderLine =
                serde_json::from_str(line).map_err(|e| ReconError::ToolOutput {
                    tool: "subfinder",
                    detail: format!("{e} in line {line:?}"),
                })?;
            Ok((parsed.host, parsed.source))
        })
        .collect()
}

/// Scope-filter, merge sources per name, and force the apex in. Output is
/// sorted by name (BTreeMap iteration order).
fn collect_names(
    target: &str,
    discovered: Vec<(String, Option<String>)>,
    scope: &Scope,
) -> Vec<DiscoveredName> {
    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (host, source) in discovered {
        let name = host.trim_end_matches('.').to_lowercase();
        if !scope.allows_name(&name) {
            tracing::debug!(name = %name, "Discovered name out of scope, dropped");
            continue;
        }
        let sources = merged.entry(name).or_default();
        if let Some(source) = source {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
    }

    merged.entry(target.to_lowercase()).or_default();

    merged
        .into_iter()
        .map(|(name, sources)| DiscoveredName { name, sources })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_for(root: &str) -> Scope {
        Scope::new(vec![root.to_string()], vec![], vec![]).unwrap()
    }

    #[test]
    fn parses_json_lines() {
        let raw = concat!(
            r#"{"host":"api.example.com","source":"crtsh"}"#,
            "\n\n",
            r#"{"host":"www.example.com","source":"dnsdumpster"}"#,
            "\n",
        );
        let parsed = parse_subfinder_lines(raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "api.example.com");
        assert_eq!(parsed[0].1.as_deref(), Some("crtsh"));
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_subfinder_lines("{\"host\": \n").unwrap_err();
        assert!(matches!(
            err,
            ReconError::ToolOutput { tool: "subfinder", .. }
        ));
    }

    #[test]
    fn out_of_scope_names_are_dropped() {
        let discovered = vec![
            ("api.example.com".to_string(), Some("crtsh".to_string())),
            ("evil.other.net".to_string(), Some("crtsh".to_string())),
        ];
        let names = collect_names("example.com", discovered, &scope_for("example.com"));
        let listed: Vec<&str> = names.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(listed, vec!["api.example.com", "example.com"]);
    }

    #[test]
    fn apex_is_always_included_and_output_sorted() {
        let names = collect_names("example.com", vec![], &scope_for("example.com"));
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "example.com");
        assert!(names[0].sources.is_empty());
    }

    #[test]
    fn duplicate_names_merge_sources() {
        let discovered = vec![
            ("API.example.com.".to_string(), Some("crtsh".to_string())),
            ("api.example.com".to_string(), Some("wayback".to_string())),
            ("api.example.com".to_string(), Some("crtsh".to_string())),
        ];
        let names = collect_names("example.com", discovered, &scope_for("example.com"));
        let api = names.iter().find(|n| n.name == "api.example.com").unwrap();
        assert_eq!(api.sources, vec!["crtsh", "wayback"]);
    }
}
