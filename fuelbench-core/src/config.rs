//! Configuration management.
//!
//! Configuration is resolved once at startup from three layers: built-in
//! defaults, the `global` section of the config file, and the
//! `profiles.<user>` section for the invoking operator. The resolved value is
//! immutable and handed to every component at construction.

use crate::error::{BenchError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Resolved fuelbench configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub default_iso: String,
    pub fuel_version_file: String,
    pub max_site_id: u32,
    pub site_limit: u32,
    pub node_limit: u32,

    /// Address templates; `{0}` is the site id, `{1}` the host octet.
    pub admin_network_ip: String,
    pub public_network_ip: String,

    pub libvirt_uri: String,
    pub vm_install_wait: u32,
    pub storage_pool: String,
    pub search_domain: String,

    pub master_name: String,
    pub master_hostname: String,
    pub master_user: String,
    pub master_pass: String,
    pub master_prompt: String,
    pub master_cpu: u32,
    /// Megabytes
    pub master_ram: u32,
    /// Gigabytes
    pub master_disk: u32,
    pub ssh_port: u16,

    pub slave_cpu: u32,
    pub slave_ram: u32,
    pub slave_disk: u32,

    pub default_controller: u32,
    pub default_compute: u32,
    pub default_storage: u32,
    pub controller_cpu: u32,
    pub controller_ram: u32,
    pub controller_disk: u32,
    pub compute_cpu: u32,
    pub compute_ram: u32,
    pub compute_disk: u32,
    pub storage_cpu: u32,
    pub storage_ram: u32,
    pub storage_disk: u32,

    pub disable_public: bool,
    pub disable_snapshot: bool,

    /// Host port templates; `%02d` is replaced by the zero-padded site id.
    pub fuelssh_adm_mapped_port: String,
    pub fuelssh_pub_mapped_port: String,
    pub fuelweb_adm_mapped_port: String,
    pub fuelweb_pub_mapped_port: String,
    pub horiweb_lt7_mapped_port: String,
    pub horiweb_gt7_mapped_port: String,
    pub horissl_lt7_mapped_port: String,
    pub horissl_gt7_mapped_port: String,

    pub operational_timeout_secs: u64,
    pub readiness_timeout_secs: u64,
    pub poweroff_timeout_secs: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            default_iso: paths::install_dir()
                .join("iso")
                .join("MirantisOpenStack-6.0.iso")
                .to_string_lossy()
                .to_string(),
            fuel_version_file: "version.yaml".to_string(),
            max_site_id: 99,
            site_limit: 10,
            node_limit: 10,
            admin_network_ip: "10.20.{0}.{1}".to_string(),
            public_network_ip: "172.16.{0}.{1}".to_string(),
            libvirt_uri: "qemu:///system".to_string(),
            vm_install_wait: 45,
            storage_pool: "default".to_string(),
            search_domain: "lenovo.com".to_string(),
            master_name: "master".to_string(),
            master_hostname: "fuel.localdomain".to_string(),
            master_user: "root".to_string(),
            master_pass: "r00tme".to_string(),
            master_prompt: "root@fuel ~]#".to_string(),
            master_cpu: 2,
            master_ram: 4096,
            master_disk: 80,
            ssh_port: 22,
            slave_cpu: 1,
            slave_ram: 2048,
            slave_disk: 80,
            default_controller: 1,
            default_compute: 2,
            default_storage: 0,
            controller_cpu: 2,
            controller_ram: 4096,
            controller_disk: 80,
            compute_cpu: 1,
            compute_ram: 2048,
            compute_disk: 80,
            storage_cpu: 1,
            storage_ram: 1024,
            storage_disk: 128,
            disable_public: false,
            disable_snapshot: false,
            fuelssh_adm_mapped_port: "122%02d".to_string(),
            fuelssh_pub_mapped_port: "123%02d".to_string(),
            fuelweb_adm_mapped_port: "188%02d".to_string(),
            fuelweb_pub_mapped_port: "189%02d".to_string(),
            horiweb_lt7_mapped_port: "180%02d".to_string(),
            horiweb_gt7_mapped_port: "181%02d".to_string(),
            horissl_lt7_mapped_port: "184%02d".to_string(),
            horissl_gt7_mapped_port: "185%02d".to_string(),
            operational_timeout_secs: 45 * 60,
            readiness_timeout_secs: 15 * 60,
            poweroff_timeout_secs: 5 * 60,
        }
    }
}

impl BenchConfig {
    /// Load configuration for `user` from the YAML file at `path`.
    ///
    /// A missing file resolves to the built-in defaults.
    pub fn load(path: &Path, user: &str) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
        let file: Value = serde_yaml::from_str(&content)
            .map_err(|e| BenchError::Yaml { path: path.to_path_buf(), source: e })?;

        info!(path = %path.display(), user = %user, "Loading configuration");
        Self::from_layers(&file, user)
    }

    /// Load from the default config file for the invoking operator.
    pub fn load_default() -> Result<Self> {
        Self::load(&paths::config_file(), &current_user())
    }

    /// Resolve defaults, the `global` section and `profiles.<user>` into one value.
    pub fn from_layers(file: &Value, user: &str) -> Result<Self> {
        let mut merged = serde_yaml::to_value(Self::default()).map_err(|e| {
            BenchError::InvalidConfig { reason: format!("Failed to serialize defaults: {}", e) }
        })?;

        if let Some(global) = file.get("global") {
            overlay(&mut merged, global)?;
        }

        if let Some(profile) = file.get("profiles").and_then(|p| p.get(user)) {
            debug!(user = %user, "Applying operator profile");
            overlay(&mut merged, profile)?;
        }

        serde_yaml::from_value(merged).map_err(|e| BenchError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Apply per-invocation overrides for management node creation.
    pub fn with_master_overrides(&self, overrides: &MasterOverrides) -> Self {
        let mut config = self.clone();
        if let Some(cpu) = overrides.cpu {
            config.master_cpu = cpu;
        }
        if let Some(ram) = overrides.ram {
            config.master_ram = ram;
        }
        if let Some(disk) = overrides.disk {
            config.master_disk = disk;
        }
        if let Some(wait) = overrides.install_wait {
            config.vm_install_wait = wait;
        }
        if let Some(disable) = overrides.disable_public {
            config.disable_public = disable;
        }
        if let Some(disable) = overrides.disable_snapshot {
            config.disable_snapshot = disable;
        }
        config
    }

    /// Apply per-invocation overrides for workload node creation.
    pub fn with_slave_overrides(&self, overrides: &SlaveOverrides) -> Self {
        let mut config = self.clone();
        if let Some(cpu) = overrides.cpu {
            config.slave_cpu = cpu;
        }
        if let Some(ram) = overrides.ram {
            config.slave_ram = ram;
        }
        if let Some(disk) = overrides.disk {
            config.slave_disk = disk;
        }
        config
    }

    /// Sizing overrides matching a named node profile.
    pub fn slave_profile(&self, profile: NodeProfile) -> SlaveOverrides {
        let (cpu, ram, disk) = match profile {
            NodeProfile::Controller => (self.controller_cpu, self.controller_ram, self.controller_disk),
            NodeProfile::Compute => (self.compute_cpu, self.compute_ram, self.compute_disk),
            NodeProfile::Storage => (self.storage_cpu, self.storage_ram, self.storage_disk),
        };
        SlaveOverrides { cpu: Some(cpu), ram: Some(ram), disk: Some(disk) }
    }

    pub fn operational_timeout(&self) -> Duration {
        Duration::from_secs(self.operational_timeout_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn poweroff_timeout(&self) -> Duration {
        Duration::from_secs(self.poweroff_timeout_secs)
    }
}

/// Per-invocation overrides for `create_master`. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct MasterOverrides {
    pub cpu: Option<u32>,
    pub ram: Option<u32>,
    pub disk: Option<u32>,
    pub install_wait: Option<u32>,
    pub disable_public: Option<bool>,
    pub disable_snapshot: Option<bool>,
}

/// Per-invocation overrides for `create_slave`. `None` keeps the configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveOverrides {
    pub cpu: Option<u32>,
    pub ram: Option<u32>,
    pub disk: Option<u32>,
}

/// Sizing profiles for workload nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeProfile {
    Controller,
    Compute,
    Storage,
}

impl std::str::FromStr for NodeProfile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "controller" => Ok(Self::Controller),
            "compute" => Ok(Self::Compute),
            "storage" | "cinder" | "ceph-osd" => Ok(Self::Storage),
            _ => Err(format!("Unknown node profile: {}", s)),
        }
    }
}

/// Shallow key-by-key overlay, like a dictionary update. Null values are skipped.
fn overlay(base: &mut Value, layer: &Value) -> Result<()> {
    let layer = match layer {
        Value::Mapping(m) => m,
        Value::Null => return Ok(()),
        _ => {
            return Err(BenchError::InvalidConfig {
                reason: "config sections must be mappings".to_string(),
            })
        }
    };

    if let Value::Mapping(base) = base {
        for (key, value) in layer {
            if !value.is_null() {
                base.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

/// Render an address template such as `10.20.{0}.{1}`.
pub fn render_address(template: &str, site: u32, host: u8) -> String {
    template.replace("{0}", &site.to_string()).replace("{1}", &host.to_string())
}

/// Render a port template such as `122%02d`.
pub fn render_port(template: &str, site: u32) -> String {
    template.replace("%02d", &format!("{:02}", site))
}

/// Name of the invoking operator, used to select a config profile.
pub fn current_user() -> String {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "root".to_string())
}
