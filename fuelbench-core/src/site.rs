//! Site domain types: the per-site network plan and VM naming.

use crate::config::{render_address, BenchConfig};
use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index of the administrative network in a [`NetworkPlan`].
pub const ADMIN_NET: usize = 0;
/// Index of the public-facing network in a [`NetworkPlan`].
pub const PUBLIC_NET: usize = 1;

/// Suffix identifying the management node among a site's VMs.
pub const MASTER_SUFFIX: &str = "-master";

/// Virtual network descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NetworkSpec {
    /// NAT-forwarded network with host-side addressing.
    Nat { cidr: String, gateway: String, netmask: String },
    /// Bridge without addressing or forwarding.
    Isolated,
}

impl NetworkSpec {
    fn nat(template: &str, site: u32) -> Self {
        Self::Nat {
            cidr: format!("{}/24", render_address(template, site, 0)),
            gateway: render_address(template, site, 1),
            netmask: "255.255.255.0".to_string(),
        }
    }

    pub fn gateway(&self) -> Option<&str> {
        match self {
            Self::Nat { gateway, .. } => Some(gateway),
            Self::Isolated => None,
        }
    }

    pub fn cidr(&self) -> Option<&str> {
        match self {
            Self::Nat { cidr, .. } => Some(cidr),
            Self::Isolated => None,
        }
    }

    pub fn netmask(&self) -> Option<&str> {
        match self {
            Self::Nat { netmask, .. } => Some(netmask),
            Self::Isolated => None,
        }
    }
}

/// Addressing derived from the site id and console version.
///
/// Index 0 is always the administrative network and index 1 the public one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub networks: Vec<NetworkSpec>,
    pub master_ip: String,
    pub public_master_ip: String,
    pub public_vip: String,
    pub public_ranges: [String; 2],
    pub floating_ranges: [String; 2],
}

impl NetworkPlan {
    /// Derive the plan. `version` is the console version, empty when unknown.
    pub fn derive(site: u32, version: &str, config: &BenchConfig) -> Self {
        let admin = config.admin_network_ip.as_str();
        let public = config.public_network_ip.as_str();

        // 7.0 reserves .3 on the public network for the router
        let vip_host = if version == "7.0" { 4 } else { 3 };

        Self {
            networks: vec![
                NetworkSpec::nat(admin, site),
                NetworkSpec::nat(public, site),
                NetworkSpec::Isolated,
            ],
            master_ip: render_address(admin, site, 2),
            public_master_ip: render_address(public, site, 2),
            public_vip: render_address(public, site, vip_host),
            public_ranges: [render_address(public, site, 3), render_address(public, site, 126)],
            floating_ranges: [render_address(public, site, 130), render_address(public, site, 254)],
        }
    }

    pub fn admin(&self) -> &NetworkSpec {
        &self.networks[ADMIN_NET]
    }

    pub fn public(&self) -> &NetworkSpec {
        &self.networks[PUBLIC_NET]
    }

    pub fn admin_gateway(&self) -> &str {
        self.admin().gateway().unwrap_or_default()
    }

    pub fn public_gateway(&self) -> &str {
        self.public().gateway().unwrap_or_default()
    }

    pub fn public_cidr(&self) -> &str {
        self.public().cidr().unwrap_or_default()
    }
}

/// A numbered lab site and the state discovered about it during one operation.
#[derive(Debug, Clone)]
pub struct Site {
    pub id: u32,
    pub workdir: PathBuf,
    pub plan: NetworkPlan,
    /// Console version from the installer image or the live management node.
    pub version: String,
    pub env_name: Option<String>,
    pub env_id: Option<u32>,
    pub release: Option<String>,
    pub disable_master_public: bool,
}

impl Site {
    pub fn new(id: u32, workdir: PathBuf, config: &BenchConfig) -> Result<Self> {
        if id == 0 || id > config.max_site_id {
            return Err(BenchError::validation(format!(
                "Site id must be between 1 and {}, got {}",
                config.max_site_id, id
            )));
        }

        Ok(Self {
            id,
            workdir,
            plan: NetworkPlan::derive(id, "", config),
            version: String::new(),
            env_name: None,
            env_id: None,
            release: None,
            disable_master_public: config.disable_public,
        })
    }

    /// Record a newly discovered console version and recompute the plan.
    pub fn set_version(&mut self, version: String, config: &BenchConfig) {
        self.plan = NetworkPlan::derive(self.id, &version, config);
        self.version = version;
    }

    /// `site<N>-<name>`, the provider-side name of a site VM.
    pub fn vm_name(&self, name: &str) -> String {
        vm_name(self.id, name)
    }
}

/// `site<N>-<name>`, the provider-side name of a site VM.
pub fn vm_name(site: u32, name: &str) -> String {
    format!("site{}-{}", site, name)
}

/// Whether a VM name denotes a management node.
pub fn is_master(vm: &str) -> bool {
    vm.ends_with(MASTER_SUFFIX)
}

/// Largest `n` among names of the form `[site<N>-]node-<n>`; 0 when none match.
pub fn max_node_ordinal<S: AsRef<str>>(names: &[S]) -> u32 {
    names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            let short = match name.split_once('-') {
                Some((prefix, rest)) if prefix.starts_with("site") => rest,
                _ => name,
            };
            short.strip_prefix("node-").and_then(|n| {
                if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) {
                    n.parse::<u32>().ok()
                } else {
                    None
                }
            })
        })
        .max()
        .unwrap_or(0)
}

/// Ordinal for the next workload node.
pub fn next_node_ordinal<S: AsRef<str>>(names: &[S]) -> u32 {
    max_node_ordinal(names) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_layout() {
        let plan = NetworkPlan::derive(5, "6.1", &BenchConfig::default());
        assert_eq!(plan.networks.len(), 3);
        assert_eq!(
            plan.admin(),
            &NetworkSpec::Nat {
                cidr: "10.20.5.0/24".to_string(),
                gateway: "10.20.5.1".to_string(),
                netmask: "255.255.255.0".to_string(),
            }
        );
        assert_eq!(plan.public_cidr(), "172.16.5.0/24");
        assert_eq!(plan.networks[2], NetworkSpec::Isolated);
        assert_eq!(plan.master_ip, "10.20.5.2");
        assert_eq!(plan.public_master_ip, "172.16.5.2");
        assert_eq!(plan.public_ranges, ["172.16.5.3".to_string(), "172.16.5.126".to_string()]);
        assert_eq!(plan.floating_ranges, ["172.16.5.130".to_string(), "172.16.5.254".to_string()]);
    }

    #[test]
    fn test_vip_depends_on_version() {
        let config = BenchConfig::default();
        assert_eq!(NetworkPlan::derive(1, "6.0", &config).public_vip, "172.16.1.3");
        assert_eq!(NetworkPlan::derive(1, "7.0", &config).public_vip, "172.16.1.4");
        assert_eq!(NetworkPlan::derive(1, "", &config).public_vip, "172.16.1.3");
    }

    #[test]
    fn test_set_version_recomputes_plan() {
        let config = BenchConfig::default();
        let mut site = Site::new(2, PathBuf::from("/tmp/site2"), &config).unwrap();
        assert_eq!(site.plan.public_vip, "172.16.2.3");
        site.set_version("7.0".to_string(), &config);
        assert_eq!(site.plan.public_vip, "172.16.2.4");
        assert_eq!(site.version, "7.0");
    }

    #[test]
    fn test_site_id_bounds() {
        let config = BenchConfig::default();
        assert!(Site::new(0, PathBuf::new(), &config).is_err());
        assert!(Site::new(100, PathBuf::new(), &config).is_err());
        assert!(Site::new(99, PathBuf::new(), &config).is_ok());
    }

    #[test]
    fn test_next_node_ordinal() {
        assert_eq!(next_node_ordinal(&["node-1", "node-3"]), 4);
        assert_eq!(next_node_ordinal::<&str>(&[]), 1);
        assert_eq!(next_node_ordinal(&["site4-master", "site4-node-2", "site4-node-10"]), 11);
        assert_eq!(next_node_ordinal(&["site4-master", "node-x", "node-"]), 1);
    }

    #[test]
    fn test_role_from_suffix() {
        assert!(is_master("site1-master"));
        assert!(!is_master("site1-node-1"));
        assert_eq!(vm_name(3, "node-2"), "site3-node-2");
    }
}
