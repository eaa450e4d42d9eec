//! Configuration for the outpost-recon pipeline.

use serde::Deserialize;

/// Top-level recon configuration.
///
/// Loaded from `outpost.toml` `[recon]` section or
/// `OUTPOST_RECON__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    /// Base directory for derived working directories.
    #[serde(default = "default_output_root")]
    pub output_root: String,

    /// Directory for the run registry.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Root domains considered in scope. Empty = everything under the
    /// scanned target.
    #[serde(default)]
    pub scope_roots: Vec<String>,

    /// CIDR ranges considered in scope for address filtering.
    #[serde(default)]
    pub scope_cidrs: Vec<String>,

    /// Name suffixes explicitly excluded from scope.
    #[serde(default)]
    pub scope_excludes: Vec<String>,

    /// External tool paths and knobs.
    #[serde(default)]
    pub tools: ToolConfig,
}

/// Paths and options for the external scanning utilities each stage
/// shells out to.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_subfinder_path")]
    pub subfinder_path: String,

    #[serde(default = "default_dnsx_path")]
    pub dnsx_path: String,

    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    #[serde(default = "default_nuclei_path")]
    pub nuclei_path: String,

    /// `--top-ports` value passed to nmap.
    #[serde(default = "default_top_ports")]
    pub nmap_top_ports: u16,

    /// Severity filter passed to nuclei (`-severity`).
    #[serde(default = "default_nuclei_severity")]
    pub nuclei_severity: String,
}

fn default_output_root() -> String {
    "./scans".to_string()
}

fn default_store_dir() -> String {
    "./runs".to_string()
}

fn default_subfinder_path() -> String {
    "subfinder".to_string()
}

fn default_dnsx_path() -> String {
    "dnsx".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_nuclei_path() -> String {
    "nuclei".to_string()
}

fn default_top_ports() -> u16 {
    1000
}

fn default_nuclei_severity() -> String {
    "medium,high,critical".to_string()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            subfinder_path: default_subfinder_path(),
            dnsx_path: default_dnsx_path(),
            nmap_path: default_nmap_path(),
            nuclei_path: default_nuclei_path(),
            nmap_top_ports: default_top_ports(),
            nuclei_severity: default_nuclei_severity(),
        }
    }
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            store_dir: default_store_dir(),
            scope_roots: Vec::new(),
            scope_cidrs: Vec::new(),
            scope_excludes: Vec::new(),
            tools: ToolConfig::default(),
        }
    }
}
