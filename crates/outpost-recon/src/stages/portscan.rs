//! TCP port scanning of resolved addresses via nmap.

use std::collections::BTreeMap;
use std::net::IpAddr;

use outpost_core::types::{DomainRecord, HostRecord, PortRecord, Protocol};

use crate::config::ToolConfig;
use crate::nmap_xml::{self, NmapRun};
use crate::scope::Scope;
use crate::snapshot::{DOMAINS_FILE, HOSTS_FILE};
use crate::stage::{read_required_artifact, write_artifact, Stage, StageContext, StageFuture};
use crate::stages::run_tool;

/// Stage `portscan`: scans every in-scope resolved address with nmap and
/// writes `data/hosts.json`.
///
/// When resolution produced no in-scope addresses the stage writes an
/// empty host list and succeeds; downstream stages treat that like any
/// other empty collection.
pub struct PortscanStage {
    tools: ToolConfig,
}

impl PortscanStage {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }
}

impl Stage for PortscanStage {
    fn name(&self) -> &'static str {
        "portscan"
    }

    fn run(&self, ctx: StageContext) -> StageFuture {
        let tools = self.tools.clone();
        Box::pin(async move {
            ctx.check_deadline()?;

            let domains: Vec<DomainRecord> =
                read_required_artifact(&ctx.artifact_path(DOMAINS_FILE))?;
            let associations = host_associations(&domains, &ctx.scope);

            if associations.is_empty() {
                tracing::info!(target = %ctx.target, "No in-scope addresses to scan");
                write_artifact(&ctx.artifact_path(HOSTS_FILE), &Vec::<HostRecord>::new())?;
                return Ok(());
            }

            let mut args = vec![
                "-oX".to_string(),
                "-".to_string(),
                "-sT".to_string(),
                "-T4".to_string(),
                "--top-ports".to_string(),
                tools.nmap_top_ports.to_string(),
            ];
            args.extend(associations.keys().cloned());

            let stdout = run_tool(&ctx, "nmap", &tools.nmap_path, &args, None).await?;
            let run = nmap_xml::parse(&stdout)?;
            let hosts = hosts_from_scan(&run, &associations);
            let open_ports: usize = hosts.iter().map(|h| h.ports.len()).sum();

            write_artifact(&ctx.artifact_path(HOSTS_FILE), &hosts)?;

            tracing::info!(
                target = %ctx.target,
                addresses_scanned = associations.len(),
                hosts_up = hosts.len(),
                open_ports,
                "Port scan complete"
            );
            Ok(())
        })
    }
}

/// Map each in-scope resolved address to the domain names pointing at it.
/// Keys iterate sorted (BTreeMap), so the nmap target list and the final
/// artifact are deterministic. Domain lists keep the resolve stage's
/// name order, making the first entry the display hostname.
fn host_associations(domains: &[DomainRecord], scope: &Scope) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in domains {
        for address in &record.addresses {
            let Ok(ip) = address.parse::<IpAddr>() else {
                tracing::debug!(address = %address, "Unparsable address, skipped");
                continue;
            };
            if !scope.allows_ip(ip) {
                continue;
            }
            let names = map.entry(address.clone()).or_default();
            if !names.contains(&record.name) {
                names.push(record.name.clone());
            }
        }
    }
    map
}

/// Convert parsed nmap output into host records: hosts that are up, open
/// ports only, sorted by address then port.
fn hosts_from_scan(run: &NmapRun, associations: &BTreeMap<String, Vec<String>>) -> Vec<HostRecord> {
    let mut hosts: Vec<HostRecord> = run
        .hosts
        .iter()
        .filter(|h| h.is_up())
        .filter_map(|h| {
            let address = h.ip()?.to_string();
            let mut ports: Vec<PortRecord> = h
                .open_ports()
                .filter_map(|p| {
                    let protocol = match p.protocol.as_str() {
                        "tcp" => Protocol::Tcp,
                        "udp" => Protocol::Udp,
                        _ => return None,
                    };
                    Some(PortRecord {
                        number: p.port_id,
                        protocol,
                        service: p.service.as_ref().map(|s| s.name.clone()),
                    })
                })
                .collect();
            ports.sort_by_key(|p| (p.number, p.protocol));

            let domains = associations.get(&address).cloned().unwrap_or_default();
            Some(HostRecord {
                address,
                domains,
                ports,
            })
        })
        .collect();

    hosts.sort_by(|a, b| a.address.cmp(&b.address));
    hosts
}
