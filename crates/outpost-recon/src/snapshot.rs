//! Point-in-time view of one run's result artifacts.
//!
//! A snapshot is reconstructed fresh from the three structured artifacts
//! under a working directory's data subarea. A file that simply does not
//! exist yields an empty collection — the stage may legitimately not have
//! run — while an unreadable or unparsable file is an error: it means a
//! prior run is broken, which must not be mistaken for "nothing found".

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use outpost_core::types::{DomainRecord, FindingRecord, HostRecord};

use crate::error::Result;

/// Subdirectory of a working directory holding stage artifacts.
pub const DATA_DIR: &str = "data";

/// Raw discovered names, written by the enumerate stage.
pub const SUBDOMAINS_FILE: &str = "subdomains.json";
/// Resolved domain records, written by the resolve stage.
pub const DOMAINS_FILE: &str = "domains.json";
/// Host/port records, written by the portscan stage.
pub const HOSTS_FILE: &str = "hosts.json";
/// Template findings, written by the vulnscan stage.
pub const FINDINGS_FILE: &str = "findings.json";
/// Snapshot delta, written by the diff stage.
pub const DIFF_FILE: &str = "diff.json";
/// Rendered markdown report, written at the working directory root.
pub const REPORT_FILE: &str = "report.md";

/// The three independently-optional result collections of one run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub dir: PathBuf,
    pub domains: Vec<DomainRecord>,
    pub hosts: Vec<HostRecord>,
    pub findings: Vec<FindingRecord>,
}

impl Snapshot {
    /// Load the snapshot stored under a working directory.
    pub fn load(workdir: &Path) -> Result<Self> {
        let data = workdir.join(DATA_DIR);
        Ok(Self {
            dir: workdir.to_path_buf(),
            domains: read_collection(&data.join(DOMAINS_FILE))?,
            hosts: read_collection(&data.join(HOSTS_FILE))?,
            findings: read_collection(&data.join(FINDINGS_FILE))?,
        })
    }

    /// A snapshot with no artifacts, used as the baseline when a target
    /// has no prior run to compare against.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Read one artifact collection. Absent file → empty collection; any
/// other failure propagates.
fn read_collection<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match fs::read_to_string(path) {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
