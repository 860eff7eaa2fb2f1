//! libvirt provider driven through `virsh` and `virt-install`.

use super::{network_name, vm_prefix, BootMode, VirtProvider, VmInstallSpec};
use crate::command::CommandRunner;
use crate::error::{BenchError, Result};
use crate::site::{is_master, NetworkSpec};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Storage pool holding transient installer images.
const MEDIA_POOL: &str = "tmp";

static BOOT_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*<boot\s+dev=['\x22][^'\x22]*['\x22]\s*/>").expect("valid regex"));

static POOL_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<target>.*?<path>\s*([^<]+?)\s*</path>").expect("valid regex"));

/// libvirt backend.
#[derive(Debug, Clone)]
pub struct VirshProvider {
    uri: String,
    storage_pool: String,
    runner: CommandRunner,
}

impl VirshProvider {
    pub fn new(uri: impl Into<String>, storage_pool: impl Into<String>, runner: CommandRunner) -> Self {
        Self { uri: uri.into(), storage_pool: storage_pool.into(), runner }
    }

    async fn virsh(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["--connect".to_string(), self.uri.clone()];
        full.extend(args.iter().map(|a| a.to_string()));
        self.runner.run("virsh", &full).await
    }

    async fn names(&self, args: &[&str]) -> Result<Vec<String>> {
        Ok(self
            .virsh(args)
            .await?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn active_vms(&self) -> Result<HashSet<String>> {
        Ok(self.names(&["list", "--name"]).await?.into_iter().collect())
    }

    async fn define_from_xml(&self, verb: &str, xml: &str) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("fuelbench-")
            .suffix(".xml")
            .tempfile()
            .map_err(|e| BenchError::io(std::env::temp_dir(), e))?;
        file.write_all(xml.as_bytes()).map_err(|e| BenchError::io(file.path(), e))?;
        let path = file.path().to_string_lossy().into_owned();
        self.virsh(&[verb, &path]).await?;
        Ok(())
    }

    async fn undefine(&self, name: &str) -> Result<()> {
        self.virsh(&["undefine", name, "--managed-save", "--snapshots-metadata", "--remove-all-storage"])
            .await?;
        Ok(())
    }

    async fn remove_vms(&self, site: u32, keep_master: bool) -> Result<()> {
        let active = self.active_vms().await?;
        for vm in self.list_vms(site).await? {
            if keep_master && is_master(&vm) {
                continue;
            }
            if active.contains(&vm) {
                self.stop_vm(&vm).await?;
            }
            self.undefine(&vm).await?;
            info!(vm = %vm, "VM removed");
        }
        Ok(())
    }

    /// Rewrite the persisted boot order to network first, then disk.
    async fn keep_network_boot(&self, name: &str) -> Result<()> {
        let xml = self.virsh(&["dumpxml", name]).await?;
        let rewritten = network_first_boot(&xml)
            .ok_or_else(|| BenchError::validation(format!("Domain {} has no <os> section", name)))?;
        self.define_from_xml("define", &rewritten).await
    }
}

#[async_trait]
impl VirtProvider for VirshProvider {
    #[instrument(skip(self))]
    async fn list_vms(&self, site: u32) -> Result<Vec<String>> {
        let prefix = vm_prefix(site);
        Ok(self
            .names(&["list", "--all", "--name"])
            .await?
            .into_iter()
            .filter(|n| n.starts_with(&prefix))
            .collect())
    }

    #[instrument(skip(self, spec), fields(vm = %spec.name))]
    async fn install_vm(&self, site: u32, spec: &VmInstallSpec) -> Result<String> {
        spec.validate()?;
        info!(site, "Installing VM");

        let pool_path = self.storage_path().await?;
        let args = install_args(&self.uri, &pool_path, spec);
        let installed = self.runner.run("virt-install", &args).await;

        if spec.delete_media {
            if let BootMode::Image(image) = &spec.boot {
                if let Some(volume) = image.file_name().map(|f| f.to_string_lossy().into_owned()) {
                    if let Err(e) = self.virsh(&["vol-delete", &volume, "--pool", MEDIA_POOL]).await {
                        warn!(volume = %volume, error = %e, "Failed to delete installer media");
                    }
                }
            }
        }

        if let Err(e) = installed {
            metrics::counter!("fuelbench_vm_install_failures_total", "provider" => "virsh").increment(1);
            return Err(e);
        }

        if spec.persistent_network_boot {
            self.stop_vm(&spec.name).await?;
            if spec.boot == BootMode::Network {
                self.keep_network_boot(&spec.name).await?;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.start_vm(&spec.name).await?;
        }

        metrics::counter!("fuelbench_vms_installed_total", "provider" => "virsh").increment(1);
        info!("VM installed");
        Ok(spec.name.clone())
    }

    #[instrument(skip(self))]
    async fn start_vm(&self, name: &str) -> Result<()> {
        self.virsh(&["start", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop_vm(&self, name: &str) -> Result<()> {
        self.virsh(&["destroy", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset_vm(&self, name: &str) -> Result<()> {
        self.virsh(&["reset", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_vm(&self, name: &str) -> Result<()> {
        self.undefine(name).await
    }

    async fn is_active(&self, name: &str) -> Result<bool> {
        let state = self.virsh(&["domstate", name]).await?;
        Ok(domain_state_active(state.trim()))
    }

    #[instrument(skip(self, description))]
    async fn create_snapshot(&self, name: &str, snapshot: &str, description: &str) -> Result<()> {
        self.virsh(&["snapshot-create-as", name, snapshot, "--description", description]).await?;
        info!("Snapshot created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revert_snapshot(&self, name: &str, snapshot: &str) -> Result<()> {
        self.virsh(&["snapshot-revert", name, snapshot]).await?;
        info!("Snapshot reverted");
        Ok(())
    }

    #[instrument(skip(self, specs))]
    async fn create_networks(&self, site: u32, specs: &[NetworkSpec]) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(specs.len());
        for (idx, spec) in specs.iter().enumerate() {
            let name = network_name(site, idx + 1);
            self.define_from_xml("net-define", &network_xml(&name, spec)).await?;
            self.virsh(&["net-autostart", &name]).await?;
            self.virsh(&["net-start", &name]).await?;
            info!(network = %name, "Network created");
            names.push(name);
        }
        Ok(names)
    }

    async fn list_networks(&self, site: u32) -> Result<Vec<String>> {
        let all = self.names(&["net-list", "--all", "--name"]).await?;
        Ok(site_networks(site, all))
    }

    #[instrument(skip(self))]
    async fn clean_networks(&self, site: u32) -> Result<()> {
        let active: HashSet<String> = self.names(&["net-list", "--name"]).await?.into_iter().collect();
        for net in self.list_networks(site).await? {
            if active.contains(&net) {
                self.virsh(&["net-destroy", &net]).await?;
            }
            self.virsh(&["net-undefine", &net]).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clean_vms(&self, site: u32) -> Result<()> {
        self.remove_vms(site, false).await
    }

    #[instrument(skip(self))]
    async fn clean_slave_vms(&self, site: u32) -> Result<()> {
        self.remove_vms(site, true).await
    }

    async fn storage_path(&self) -> Result<PathBuf> {
        let xml = self.virsh(&["pool-dumpxml", &self.storage_pool]).await?;
        POOL_PATH
            .captures(&xml)
            .map(|c| PathBuf::from(&c[1]))
            .ok_or_else(|| {
                BenchError::validation(format!("Storage pool {} has no target path", self.storage_pool))
            })
    }

    fn name(&self) -> &str {
        "virsh"
    }
}

/// `virt-install` arguments for `spec`, disks placed under `pool_path`.
pub fn install_args(uri: &str, pool_path: &Path, spec: &VmInstallSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--connect".into(),
        uri.into(),
        "--virt-type".into(),
        "kvm".into(),
        "--name".into(),
        spec.name.clone(),
        "--vcpus".into(),
        spec.vcpus.to_string(),
        "--ram".into(),
        spec.ram_mb.to_string(),
        "--disk".into(),
        format!(
            "path={}/{}.img,format=qcow2,size={},bus=virtio,cache=writeback,io=threads",
            pool_path.display(),
            spec.name,
            spec.disk_gb
        ),
    ];

    for net in &spec.networks {
        args.push("--network".into());
        args.push(format!("network={},model=virtio", net));
    }

    args.extend(["--graphics".into(), "vnc".into(), "--noautoconsole".into()]);

    match &spec.boot {
        BootMode::Image(image) => {
            args.push("--cdrom".into());
            args.push(image.display().to_string());
        }
        BootMode::Network => args.push("--pxe".into()),
    }

    args.push("--os-variant".into());
    args.push(spec.os_variant.clone());
    args.push(format!("--wait={}", spec.wait_minutes.unwrap_or(0)));
    args
}

/// libvirt network definition for one site network.
pub fn network_xml(name: &str, spec: &NetworkSpec) -> String {
    match spec {
        NetworkSpec::Nat { gateway, netmask, .. } => format!(
            "<network>\n  <name>{name}</name>\n  <forward mode='nat'/>\n  <bridge stp='on' delay='0' />\n  <ip address='{gateway}' netmask='{netmask}'>\n  </ip>\n</network>\n"
        ),
        NetworkSpec::Isolated => format!(
            "<network ipv6='yes'>\n  <name>{name}</name>\n  <bridge stp='on' delay='0' />\n</network>\n"
        ),
    }
}

/// Replace all `<boot dev=.../>` entries inside `<os>` with network then disk.
pub fn network_first_boot(domain_xml: &str) -> Option<String> {
    let os_start = domain_xml.find("<os")?;
    let os_end = os_start + domain_xml[os_start..].find("</os>")?;

    let section = BOOT_ENTRY.replace_all(&domain_xml[os_start..os_end], "");
    Some(format!(
        "{}{}\n    <boot dev='network'/>\n    <boot dev='hd'/>\n  {}",
        &domain_xml[..os_start],
        section.trim_end(),
        &domain_xml[os_end..]
    ))
}

/// Inactive states as printed by `virsh domstate`.
fn domain_state_active(state: &str) -> bool {
    !matches!(state, "shut off" | "crashed")
}

/// Networks of `site` sorted by their numeric index.
fn site_networks(site: u32, all: Vec<String>) -> Vec<String> {
    let prefix = format!("site{}net", site);
    let mut nets: Vec<(u32, String)> = all
        .into_iter()
        .filter_map(|n| {
            let idx = n.strip_prefix(&prefix)?.parse().ok()?;
            Some((idx, n))
        })
        .collect();
    nets.sort();
    nets.into_iter().map(|(_, n)| n).collect()
}
