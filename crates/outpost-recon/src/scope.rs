//! Scope predicate: which names and addresses a run may touch.
//!
//! Pure and stateless. Stages filter every discovered name and resolved
//! address through the run's scope before writing artifacts, so
//! out-of-scope infrastructure never enters the snapshot.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::config::ReconConfig;
use crate::error::{ReconError, Result};

/// In-scope roots, address ranges, and excluded name suffixes for a run.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    roots: Vec<String>,
    cidrs: Vec<IpNet>,
    excludes: Vec<String>,
}

impl Scope {
    /// Build a scope from explicit parts. CIDR strings that do not parse
    /// are a configuration error.
    pub fn new(roots: Vec<String>, cidrs: Vec<String>, excludes: Vec<String>) -> Result<Self> {
        let cidrs = cidrs
            .iter()
            .map(|c| {
                c.parse::<IpNet>()
                    .map_err(|e| ReconError::Config(format!("invalid scope CIDR {c:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            roots: roots.into_iter().map(|r| r.to_lowercase()).collect(),
            cidrs,
            excludes: excludes.into_iter().map(|e| e.to_lowercase()).collect(),
        })
    }

    /// Scope for a run: the configured roots plus the scanned target
    /// itself.
    pub fn for_target(config: &ReconConfig, target: &str) -> Result<Self> {
        let mut roots = config.scope_roots.clone();
        let target = target.to_lowercase();
        if !roots.iter().any(|r| r.eq_ignore_ascii_case(&target)) {
            roots.push(target);
        }
        Self::new(
            roots,
            config.scope_cidrs.clone(),
            config.scope_excludes.clone(),
        )
    }

    /// Whether a discovered name is in scope: not under an excluded
    /// suffix, and equal to or a subdomain of a root.
    pub fn allows_name(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.').to_lowercase();
        if name.is_empty() {
            return false;
        }

        if self
            .excludes
            .iter()
            .any(|ex| name == *ex || name.ends_with(&format!(".{ex}")))
        {
            return false;
        }

        if self.roots.is_empty() {
            return true;
        }

        self.roots
            .iter()
            .any(|root| name == *root || name.ends_with(&format!(".{root}")))
    }

    /// Whether a resolved address is in scope. With no CIDR restriction
    /// configured, any address reached through an in-scope name passes.
    pub fn allows_ip(&self, ip: IpAddr) -> bool {
        if self.cidrs.is_empty() {
            return true;
        }
        self.cidrs.iter().any(|net| net.contains(&ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(roots: &[&str], cidrs: &[&str], excludes: &[&str]) -> Scope {
        Scope::new(
            roots.iter().map(|s| s.to_string()).collect(),
            cidrs.iter().map(|s| s.to_string()).collect(),
            excludes.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn subdomains_of_root_are_in_scope() {
        let s = scope(&["example.com"], &[], &[]);
        assert!(s.allows_name("example.com"));
        assert!(s.allows_name("api.example.com"));
        assert!(s.allows_name("deep.api.example.com"));
        assert!(!s.allows_name("example.org"));
        assert!(!s.allows_name("notexample.com"));
    }

    #[test]
    fn excludes_beat_roots() {
        let s = scope(&["example.com"], &[], &["internal.example.com"]);
        assert!(s.allows_name("www.example.com"));
        assert!(!s.allows_name("internal.example.com"));
        assert!(!s.allows_name("db.internal.example.com"));
    }

    #[test]
    fn name_matching_ignores_case_and_trailing_dot() {
        let s = scope(&["Example.COM"], &[], &[]);
        assert!(s.allows_name("API.Example.Com."));
    }

    #[test]
    fn cidr_membership() {
        let s = scope(&[], &["10.0.0.0/24"], &[]);
        assert!(s.allows_ip("10.0.0.42".parse().unwrap()));
        assert!(!s.allows_ip("10.0.1.42".parse().unwrap()));
    }

    #[test]
    fn empty_cidrs_allow_any_address() {
        let s = scope(&["example.com"], &[], &[]);
        assert!(s.allows_ip("203.0.113.77".parse().unwrap()));
    }

    #[test]
    fn invalid_cidr_is_config_error() {
        let err = Scope::new(vec![], vec!["10.0.0.0/99".to_string()], vec![]).unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));
    }

    #[test]
    fn for_target_adds_the_target_as_root() {
        let config = ReconConfig::default();
        let s = Scope::for_target(&config, "example.com").unwrap();
        assert!(s.allows_name("www.example.com"));
        assert!(!s.allows_name("other.net"));
    }
}
