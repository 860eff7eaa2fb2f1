//! Virtualization provider abstraction.
//!
//! Site VMs and networks are managed through the `VirtProvider` trait. The
//! shipped backend drives libvirt through `virsh` and `virt-install`; tests use
//! in-memory fakes.
//!
//! Names passed to and returned from a provider are always the full
//! provider-side names (`site<N>-master`, `site<N>-node-3`, `site<N>net1`).

use crate::error::{BenchError, Result};
use crate::site::{self, NetworkSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use std::str::FromStr;

pub mod virsh;

pub use virsh::VirshProvider;

/// How a new VM boots for installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMode {
    /// Boot from an installer image.
    Image(PathBuf),
    /// Boot from the network (PXE).
    Network,
}

impl FromStr for BootMode {
    type Err = BenchError;

    /// Parses the network boot keywords. Image boot needs a path and is built directly.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pxe" | "network" => Ok(Self::Network),
            other => Err(BenchError::validation(format!("Unsupported boot mode: {}", other))),
        }
    }
}

/// Everything needed to install one VM.
#[derive(Debug, Clone)]
pub struct VmInstallSpec {
    /// Full provider-side name.
    pub name: String,
    pub vcpus: u32,
    /// Memory in MiB.
    pub ram_mb: u32,
    /// Disk size in GiB.
    pub disk_gb: u32,
    pub boot: BootMode,
    /// Networks attached in order; the first one is the boot network.
    pub networks: Vec<String>,
    pub os_variant: String,
    /// Minutes to wait for the installer; `None` returns right after boot.
    pub wait_minutes: Option<u32>,
    /// Remove the installer image from storage once installation finishes.
    pub delete_media: bool,
    /// Keep network boot first in the persisted boot order.
    pub persistent_network_boot: bool,
}

impl VmInstallSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BenchError::validation("VM name is required"));
        }
        if self.networks.is_empty() {
            return Err(BenchError::validation(format!("VM {} has no networks", self.name)));
        }
        if let BootMode::Image(path) = &self.boot {
            if path.as_os_str().is_empty() {
                return Err(BenchError::validation("A valid ISO file is required"));
            }
        }
        Ok(())
    }
}

/// Virtualization provider trait.
///
/// Methods are instrumented by implementations (not here).
#[async_trait]
pub trait VirtProvider: Send + Sync {
    /// All VM names belonging to `site`.
    async fn list_vms(&self, site: u32) -> Result<Vec<String>>;

    /// Largest `node-<n>` ordinal in `site`, 0 when there are none.
    async fn max_node_ordinal(&self, site: u32) -> Result<u32> {
        Ok(site::max_node_ordinal(&self.list_vms(site).await?))
    }

    /// Ordinal the next workload node should take.
    async fn next_node_ordinal(&self, site: u32) -> Result<u32> {
        Ok(self.max_node_ordinal(site).await? + 1)
    }

    /// Define and boot a VM. Returns its name.
    async fn install_vm(&self, site: u32, spec: &VmInstallSpec) -> Result<String>;

    async fn start_vm(&self, name: &str) -> Result<()>;

    /// Hard power-off.
    async fn stop_vm(&self, name: &str) -> Result<()>;

    async fn reset_vm(&self, name: &str) -> Result<()>;

    /// Undefine the VM and remove its storage.
    async fn delete_vm(&self, name: &str) -> Result<()>;

    async fn is_active(&self, name: &str) -> Result<bool>;

    async fn create_snapshot(&self, name: &str, snapshot: &str, description: &str) -> Result<()>;

    async fn revert_snapshot(&self, name: &str, snapshot: &str) -> Result<()>;

    /// Create the site networks in plan order. Returns their names.
    async fn create_networks(&self, site: u32, specs: &[NetworkSpec]) -> Result<Vec<String>>;

    /// Site network names, in creation order.
    async fn list_networks(&self, site: u32) -> Result<Vec<String>>;

    async fn clean_networks(&self, site: u32) -> Result<()>;

    /// Stop and delete every VM of the site.
    async fn clean_vms(&self, site: u32) -> Result<()>;

    /// Stop and delete every VM of the site except the management node.
    async fn clean_slave_vms(&self, site: u32) -> Result<()>;

    /// Filesystem path backing the VM storage pool.
    async fn storage_path(&self) -> Result<PathBuf>;

    /// Provider name (for logging/metrics).
    fn name(&self) -> &str;
}

/// `site<N>net<idx>` with a 1-based index.
pub fn network_name(site: u32, index: usize) -> String {
    format!("site{}net{}", site, index)
}

/// Prefix shared by all VM names of a site.
pub fn vm_prefix(site: u32) -> String {
    format!("site{}-", site)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(boot: BootMode) -> VmInstallSpec {
        VmInstallSpec {
            name: "site1-master".to_string(),
            vcpus: 2,
            ram_mb: 4096,
            disk_gb: 80,
            boot,
            networks: vec!["site1net1".to_string()],
            os_variant: "centos6.5".to_string(),
            wait_minutes: Some(60),
            delete_media: true,
            persistent_network_boot: false,
        }
    }

    #[test]
    fn test_boot_mode_parse() {
        assert_eq!("pxe".parse::<BootMode>().unwrap(), BootMode::Network);
        assert!(matches!("floppy".parse::<BootMode>(), Err(BenchError::Validation { .. })));
    }

    #[test]
    fn test_install_spec_validation() {
        assert!(spec(BootMode::Image(PathBuf::from("/tmp/x.iso"))).validate().is_ok());
        assert!(spec(BootMode::Image(PathBuf::new())).validate().is_err());

        let mut bare = spec(BootMode::Network);
        bare.networks.clear();
        assert!(bare.validate().is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(network_name(3, 1), "site3net1");
        assert_eq!(vm_prefix(12), "site12-");
    }
}
