//! In-memory lab used by the site pipeline tests.
//!
//! `MockProvider` and `MockShell` share one `Lab` so that a power-off issued
//! over the remote channel is eventually observed by the provider.

#![allow(dead_code)]

use async_trait::async_trait;
use fuelbench_core::{
    controller::{Collaborators, SiteController, SiteLayout},
    error::{BenchError, Result},
    image::{ImageBuilder, ImageRequest},
    observability::{StepReporter, StepStatus},
    provider::{VirtProvider, VmInstallSpec},
    remote::{ExecOutput, RemoteChannel, RemoteShell},
    site::NetworkSpec,
    BenchConfig,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const NETWORK_DOC: &str = r#"
management_vip: 10.20.1.3
networking_parameters:
  floating_ranges:
  - - 172.16.0.130
    - 172.16.0.254
  segmentation_type: vlan
networks:
- name: public
  cidr: 172.16.0.0/24
  gateway: 172.16.0.1
  ip_ranges:
  - - 172.16.0.2
    - 172.16.0.126
  meta:
    cidr: 172.16.0.0/24
    ip_range:
    - 172.16.0.2
    - 172.16.0.126
- name: management
  cidr: 192.168.0.0/24
public_vip: 172.16.0.2
"#;

pub const SETTINGS_DOC: &str = r#"
editable:
  common:
    libvirt_type:
      value: qemu
    debug:
      value: false
  external_dns:
    dns_list:
      value: 8.8.8.8
  storage:
    volumes_lvm:
      value: true
"#;

pub const INTERFACES_DOC: &str = r#"
- name: eth0
  assigned_networks:
  - {id: 1, name: fuelweb_admin}
  - {id: 2, name: management}
- name: eth1
  assigned_networks:
  - {id: 3, name: public}
  - {id: 4, name: storage}
  - {id: 5, name: private}
- name: eth2
  assigned_networks: []
"#;

pub const PROVISIONING_DOC: &str = r#"
ks_meta:
  gw: 10.20.0.1
  mco_enable: 1
profile: ubuntu_1404_x86_64
"#;

pub const ENV_TABLE: &str = "\
id | status | name            | mode       | release_id | changes                      | pending_release_id
---|--------|-----------------|------------|------------|------------------------------|-------------------
5  | new    | OpenStack Lab 1 | ha_compact | 2          | [u'attributes', u'networks'] | None
";

/// State shared by the mock collaborators.
#[derive(Default)]
pub struct Lab {
    pub vms: Vec<String>,
    pub active: HashSet<String>,
    pub networks: Vec<String>,
    /// Mutating provider calls, in order.
    pub provider_calls: Vec<String>,
    pub installs: Vec<VmInstallSpec>,
    pub active_checks: u32,
    /// Every command run over the remote channel.
    pub commands: Vec<String>,
    /// Remote filesystem.
    pub files: HashMap<String, String>,
    /// Active-state checks a VM survives after `poweroff`.
    pub poweroff_delay: u32,
    /// Version file content; `6.1` when unset.
    pub console_version: Option<String>,
    /// Environment listing; `ENV_TABLE` when unset.
    pub env_table: Option<String>,
    /// Environment listings that exit non-zero before the console answers.
    pub console_failures: u32,
    shutting_down: Option<u32>,
}

pub type SharedLab = Arc<Mutex<Lab>>;

impl Lab {
    pub fn with_console_files() -> Self {
        let mut lab = Lab::default();
        let files = [
            ("/root/fuelbench/network_5.yaml", NETWORK_DOC),
            ("/root/fuelbench/settings_5.yaml", SETTINGS_DOC),
            ("/root/fuelbench/node_7/interfaces.yaml", INTERFACES_DOC),
            ("/root/fuelbench/provisioning_5/node-7.yaml", PROVISIONING_DOC),
        ];
        for (path, content) in files {
            lab.files.insert(path.to_string(), content.to_string());
        }
        lab
    }

    pub fn doc(&self, path: &str) -> serde_yaml::Value {
        serde_yaml::from_str(&self.files[path]).unwrap()
    }
}

pub struct MockProvider {
    pub lab: SharedLab,
}

#[async_trait]
impl VirtProvider for MockProvider {
    async fn list_vms(&self, site: u32) -> Result<Vec<String>> {
        let prefix = format!("site{}-", site);
        let lab = self.lab.lock().unwrap();
        Ok(lab.vms.iter().filter(|vm| vm.starts_with(&prefix)).cloned().collect())
    }

    async fn install_vm(&self, _site: u32, spec: &VmInstallSpec) -> Result<String> {
        spec.validate()?;
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push(format!("install_vm {}", spec.name));
        lab.vms.push(spec.name.clone());
        lab.active.insert(spec.name.clone());
        lab.installs.push(spec.clone());
        Ok(spec.name.clone())
    }

    async fn start_vm(&self, name: &str) -> Result<()> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push(format!("start_vm {}", name));
        lab.active.insert(name.to_string());
        Ok(())
    }

    async fn stop_vm(&self, name: &str) -> Result<()> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push(format!("stop_vm {}", name));
        lab.active.remove(name);
        Ok(())
    }

    async fn reset_vm(&self, name: &str) -> Result<()> {
        self.lab.lock().unwrap().provider_calls.push(format!("reset_vm {}", name));
        Ok(())
    }

    async fn delete_vm(&self, name: &str) -> Result<()> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push(format!("delete_vm {}", name));
        lab.vms.retain(|vm| vm != name);
        lab.active.remove(name);
        Ok(())
    }

    async fn is_active(&self, name: &str) -> Result<bool> {
        let mut lab = self.lab.lock().unwrap();
        lab.active_checks += 1;
        if !lab.active.contains(name) {
            return Ok(false);
        }
        match lab.shutting_down {
            Some(0) => {
                lab.shutting_down = None;
                lab.active.remove(name);
                Ok(false)
            }
            Some(left) => {
                lab.shutting_down = Some(left - 1);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    async fn create_snapshot(&self, name: &str, snapshot: &str, _description: &str) -> Result<()> {
        self.lab.lock().unwrap().provider_calls.push(format!("create_snapshot {} {}", name, snapshot));
        Ok(())
    }

    async fn revert_snapshot(&self, name: &str, snapshot: &str) -> Result<()> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push(format!("revert_snapshot {} {}", name, snapshot));
        lab.active.remove(name);
        Ok(())
    }

    async fn create_networks(&self, site: u32, specs: &[NetworkSpec]) -> Result<Vec<String>> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push("create_networks".to_string());
        lab.networks = (1..=specs.len()).map(|idx| format!("site{}net{}", site, idx)).collect();
        Ok(lab.networks.clone())
    }

    async fn list_networks(&self, _site: u32) -> Result<Vec<String>> {
        Ok(self.lab.lock().unwrap().networks.clone())
    }

    async fn clean_networks(&self, _site: u32) -> Result<()> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push("clean_networks".to_string());
        lab.networks.clear();
        Ok(())
    }

    async fn clean_vms(&self, _site: u32) -> Result<()> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push("clean_vms".to_string());
        lab.vms.clear();
        lab.active.clear();
        Ok(())
    }

    async fn clean_slave_vms(&self, _site: u32) -> Result<()> {
        let mut lab = self.lab.lock().unwrap();
        lab.provider_calls.push("clean_slave_vms".to_string());
        lab.vms.retain(|vm| vm.ends_with("-master"));
        Ok(())
    }

    async fn storage_path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("/var/lib/libvirt/images"))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Answers console commands the way a 6.1 master does.
pub struct MockShell {
    pub lab: SharedLab,
}

impl MockShell {
    fn respond(lab: &mut Lab, command: &str) -> String {
        if command.contains("fuel env create") {
            "Environment 'OpenStack Lab 1' with id=5, mode=ha and network-mode=neutron was created!\n".to_string()
        } else if command.contains("fuel env --list") {
            lab.env_table.clone().unwrap_or_else(|| ENV_TABLE.to_string())
        } else if command.contains("--node-id") && command.contains("--network --download") {
            "Node attributes for interfaces were written to:\n/root/fuelbench/node_7/interfaces.yaml\n".to_string()
        } else if command.contains("settings --download") {
            "Settings configuration for environment with id=5 downloaded to /root/fuelbench/settings_5.yaml\n"
                .to_string()
        } else if command.contains("network --download") {
            "Network configuration for environment with id=5 downloaded to /root/fuelbench/network_5.yaml\n"
                .to_string()
        } else if command.contains("provisioning --default") {
            "Default provisioning info for environment 5 downloaded to /root/fuelbench/provisioning_5\n".to_string()
        } else if command.contains("bootstrap_admin_node.log") {
            "Fuel node deployment complete!\n".to_string()
        } else if command.contains("version.yaml") {
            format!("{}\n", lab.console_version.as_deref().unwrap_or("6.1"))
        } else if command.contains("poweroff") {
            lab.shutting_down = Some(lab.poweroff_delay);
            String::new()
        } else {
            String::new()
        }
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    fn host(&self) -> &str {
        "root@10.20.1.2"
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let mut lab = self.lab.lock().unwrap();
        lab.commands.push(command.to_string());
        if command.contains("fuel env --list") && lab.console_failures > 0 {
            lab.console_failures -= 1;
            return Ok(ExecOutput { output: "Connection refused\n".to_string(), exit_status: 1 });
        }
        let output = Self::respond(&mut lab, command);
        Ok(ExecOutput { output, exit_status: 0 })
    }

    async fn get(&self, remote_path: &str, local_dir: &Path) -> Result<Vec<PathBuf>> {
        let found = self.lab.lock().unwrap().files.get(remote_path).cloned();
        let Some(content) = found else {
            return Ok(Vec::new());
        };
        let name = Path::new(remote_path).file_name().unwrap();
        let local = local_dir.join(name);
        std::fs::write(&local, content).map_err(|e| BenchError::io(&local, e))?;
        Ok(vec![local])
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(local_path).map_err(|e| BenchError::io(local_path, e))?;
        self.lab.lock().unwrap().files.insert(remote_path.to_string(), content);
        Ok(vec![remote_path.to_string()])
    }
}

#[derive(Default)]
pub struct MockImages {
    pub fail_build: bool,
    /// Version read from any image; `6.1` when unset.
    pub version: Option<String>,
    /// Output paths handed to `build`, with whether each existed at the time.
    pub builds: Mutex<Vec<(PathBuf, bool)>>,
}

#[async_trait]
impl ImageBuilder for MockImages {
    async fn read_version(&self, _image: &Path) -> Result<String> {
        Ok(self.version.clone().unwrap_or_else(|| "6.1".to_string()))
    }

    async fn build(&self, _request: &ImageRequest, output: &Path) -> Result<()> {
        self.builds.lock().unwrap().push((output.to_path_buf(), output.exists()));
        if self.fail_build {
            return Err(BenchError::command("bash -xe make-custom-iso.sh", 2));
        }
        std::fs::write(output, b"custom iso").map_err(|e| BenchError::io(output, e))
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub steps: Mutex<Vec<(String, StepStatus)>>,
    pub notes: Mutex<Vec<String>>,
}

impl StepReporter for RecordingReporter {
    fn begin(&self, _step: &str) {}

    fn finish(&self, step: &str, status: StepStatus) {
        self.steps.lock().unwrap().push((step.to_string(), status));
    }

    fn note(&self, message: &str) {
        self.notes.lock().unwrap().push(message.to_string());
    }
}

/// A site 1 controller over mocks, with its directories under a temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub lab: SharedLab,
    pub images: Arc<MockImages>,
    pub reporter: Arc<RecordingReporter>,
    pub controller: SiteController,
}

impl Harness {
    pub fn new(lab: Lab, images: MockImages) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(scripts.join("enable-network.sh"), "#!/bin/sh\n").unwrap();
        std::fs::write(scripts.join("setup-master.sh"), "#!/bin/sh\n").unwrap();

        let layout = SiteLayout {
            workdir: dir.path().join("sites").join("1"),
            image_dir: dir.path().join("iso"),
            temp_dir: dir.path().join("tmp"),
            enable_network_script: scripts.join("enable-network.sh"),
            setup_master_script: scripts.join("setup-master.sh"),
        };

        let lab = Arc::new(Mutex::new(lab));
        let images = Arc::new(images);
        let reporter = Arc::new(RecordingReporter::default());
        let collaborators = Collaborators {
            provider: Arc::new(MockProvider { lab: Arc::clone(&lab) }),
            remote: RemoteChannel::single(Arc::new(MockShell { lab: Arc::clone(&lab) })),
            images: images.clone(),
            reporter: reporter.clone(),
        };

        let controller = SiteController::new(1, BenchConfig::default(), layout, collaborators).unwrap();
        Self { dir, lab, images, reporter, controller }
    }

    pub fn temp_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.dir.path().join("tmp")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn command_count(&self) -> usize {
        self.lab.lock().unwrap().commands.len()
    }
}
