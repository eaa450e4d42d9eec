//! Change detection between two run snapshots.
//!
//! Pure computation: both snapshots are already normalized by the loader
//! (absent artifacts are empty collections), so there is no error path.
//! Domains are keyed by exact name, host ports by (address, port,
//! protocol), findings by (template id, host). No fuzzy matching: a
//! finding that moves between hosts is one resolved and one new finding.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use outpost_core::types::{DomainRecord, FindingRecord, Protocol};

use crate::snapshot::Snapshot;

/// One host port that opened or closed between two runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortChange {
    pub host: String,
    /// First named entity associated with the host, falling back to the
    /// raw address.
    pub hostname: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// The delta between a current and a previous snapshot.
///
/// Every list is always present (possibly empty) so callers may iterate
/// unconditionally. The dangling buckets classify state transitions
/// independently of the new/removed lists: a domain removed while it was
/// dangling appears in both `removed_domains` and `resolved_dangling`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotDiff {
    #[serde(default)]
    pub new_domains: Vec<DomainRecord>,
    #[serde(default)]
    pub removed_domains: Vec<DomainRecord>,

    #[serde(default)]
    pub opened_ports: Vec<PortChange>,
    #[serde(default)]
    pub closed_ports: Vec<PortChange>,

    #[serde(default)]
    pub new_findings: Vec<FindingRecord>,
    #[serde(default)]
    pub resolved_findings: Vec<FindingRecord>,

    #[serde(default)]
    pub newly_dangling: Vec<DomainRecord>,
    #[serde(default)]
    pub still_dangling: Vec<DomainRecord>,
    #[serde(default)]
    pub resolved_dangling: Vec<DomainRecord>,

    #[serde(default)]
    pub summary: DiffSummary,
}

/// Raw collection sizes of both snapshots, independent of the diff lists.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSummary {
    pub domains_current: usize,
    pub domains_previous: usize,
    pub hosts_current: usize,
    pub hosts_previous: usize,
    pub findings_current: usize,
    pub findings_previous: usize,
}

impl SnapshotDiff {
    /// True when nothing changed between the two snapshots.
    pub fn is_empty(&self) -> bool {
        self.new_domains.is_empty()
            && self.removed_domains.is_empty()
            && self.opened_ports.is_empty()
            && self.closed_ports.is_empty()
            && self.new_findings.is_empty()
            && self.resolved_findings.is_empty()
            && self.newly_dangling.is_empty()
            && self.still_dangling.is_empty()
            && self.resolved_dangling.is_empty()
    }
}

/// Compute the delta between two snapshots.
pub fn compute(current: &Snapshot, previous: &Snapshot) -> SnapshotDiff {
    let mut diff = SnapshotDiff {
        summary: DiffSummary {
            domains_current: current.domains.len(),
            domains_previous: previous.domains.len(),
            hosts_current: current.hosts.len(),
            hosts_previous: previous.hosts.len(),
            findings_current: current.findings.len(),
            findings_previous: previous.findings.len(),
        },
        ..Default::default()
    };

    diff_domains(current, previous, &mut diff);
    diff_ports(current, previous, &mut diff);
    diff_findings(current, previous, &mut diff);

    // Iteration order above comes from hash maps; reporting order is
    // fixed here.
    diff.new_domains.sort_by(|a, b| a.name.cmp(&b.name));
    diff.removed_domains.sort_by(|a, b| a.name.cmp(&b.name));
    diff.newly_dangling.sort_by(|a, b| a.name.cmp(&b.name));
    diff.still_dangling.sort_by(|a, b| a.name.cmp(&b.name));
    diff.resolved_dangling.sort_by(|a, b| a.name.cmp(&b.name));
    diff.opened_ports.sort_by(port_change_order);
    diff.closed_ports.sort_by(port_change_order);
    diff.new_findings.sort_by(finding_order);
    diff.resolved_findings.sort_by(finding_order);

    diff
}

fn port_change_order(a: &PortChange, b: &PortChange) -> std::cmp::Ordering {
    (&a.host, a.port, a.protocol).cmp(&(&b.host, b.port, b.protocol))
}

fn finding_order(a: &FindingRecord, b: &FindingRecord) -> std::cmp::Ordering {
    (&a.template_id, &a.host).cmp(&(&b.template_id, &b.host))
}

fn diff_domains(current: &Snapshot, previous: &Snapshot, diff: &mut SnapshotDiff) {
    let cur: HashMap<&str, &DomainRecord> = current
        .domains
        .iter()
        .map(|d| (d.name.as_str(), d))
        .collect();
    let prev: HashMap<&str, &DomainRecord> = previous
        .domains
        .iter()
        .map(|d| (d.name.as_str(), d))
        .collect();

    for (name, record) in &cur {
        if !prev.contains_key(name) {
            diff.new_domains.push((*record).clone());
        }

        if record.dangling {
            match prev.get(name) {
                Some(p) if p.dangling => diff.still_dangling.push((*record).clone()),
                // Did not exist before, or existed without dangling.
                _ => diff.newly_dangling.push((*record).clone()),
            }
        }
    }

    for (name, record) in &prev {
        if !cur.contains_key(name) {
            diff.removed_domains.push((*record).clone());
        }

        if record.dangling {
            match cur.get(name) {
                Some(c) if c.dangling => {} // already counted as still dangling
                // Gone entirely, or still present but resolving again.
                _ => diff.resolved_dangling.push((*record).clone()),
            }
        }
    }
}

type PortKey<'a> = (&'a str, u16, Protocol);

fn diff_ports(current: &Snapshot, previous: &Snapshot, diff: &mut SnapshotDiff) {
    let cur = port_set(current);
    let prev = port_set(previous);

    for (key, hostname) in &cur {
        if !prev.contains_key(key) {
            diff.opened_ports.push(port_change(key, hostname));
        }
    }
    for (key, hostname) in &prev {
        if !cur.contains_key(key) {
            diff.closed_ports.push(port_change(key, hostname));
        }
    }
}

/// Composite port keys mapped to the owning host's display name.
fn port_set(snapshot: &Snapshot) -> HashMap<PortKey<'_>, &str> {
    let mut set = HashMap::new();
    for host in &snapshot.hosts {
        for port in &host.ports {
            set.insert(
                (host.address.as_str(), port.number, port.protocol),
                host.display_name(),
            );
        }
    }
    set
}

fn port_change(key: &PortKey<'_>, hostname: &str) -> PortChange {
    PortChange {
        host: key.0.to_string(),
        hostname: hostname.to_string(),
        port: key.1,
        protocol: key.2,
    }
}

fn diff_findings(current: &Snapshot, previous: &Snapshot, diff: &mut SnapshotDiff) {
    let cur_keys: HashSet<(&str, &str)> = current
        .findings
        .iter()
        .map(|f| (f.template_id.as_str(), f.host.as_str()))
        .collect();
    let prev_keys: HashSet<(&str, &str)> = previous
        .findings
        .iter()
        .map(|f| (f.template_id.as_str(), f.host.as_str()))
        .collect();

    for finding in &current.findings {
        if !prev_keys.contains(&(finding.template_id.as_str(), finding.host.as_str())) {
            diff.new_findings.push(finding.clone());
        }
    }
    for finding in &previous.findings {
        if !cur_keys.contains(&(finding.template_id.as_str(), finding.host.as_str())) {
            diff.resolved_findings.push(finding.clone());
        }
    }
}
