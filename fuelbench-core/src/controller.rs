//! Site lifecycle orchestration.
//!
//! `SiteController` sequences provider, remote and image operations into the
//! multi-step pipelines that build and operate one lab site. Every step runs
//! strictly after the previous one; the first error aborts the pipeline and
//! is returned as is. Each step reports a status token through the injected
//! [`StepReporter`].
//!
//! Two operations against the same site must not run concurrently.

use crate::access::AccessInfo;
use crate::command::CommandRunner;
use crate::config::{BenchConfig, MasterOverrides, SlaveOverrides};
use crate::error::{BenchError, Result};
use crate::image::{ImageBuilder, ImageRequest, ScriptImageBuilder};
use crate::observability::{StepReporter, StepStatus};
use crate::parser::{EnvironmentRecord, NodeRecord};
use crate::paths;
use crate::pipeline::transforms::PublicNetwork;
use crate::poll::{poll_until, PollSpec};
use crate::provider::{BootMode, VirshProvider, VirtProvider, VmInstallSpec};
use crate::releases::{self, ConsoleRelease};
use crate::remote::{tasks, RemoteChannel, SshShell};
use crate::site::{is_master, Site, PUBLIC_NET};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Snapshot taken of a freshly set up management node.
pub const RECOVERY_SNAPSHOT: &str = "fuel_recovery";

/// Release used for workload nodes when no environment chose one.
pub const DEFAULT_RELEASE: &str = "ubuntu";

/// Local filesystem locations used by one site.
#[derive(Debug, Clone)]
pub struct SiteLayout {
    /// Staging directory for downloaded configuration documents.
    pub workdir: PathBuf,
    /// Parent of the per-site image remastering directory.
    pub image_dir: PathBuf,
    /// Where transient installer images are written.
    pub temp_dir: PathBuf,
    pub enable_network_script: PathBuf,
    pub setup_master_script: PathBuf,
}

impl SiteLayout {
    /// Standard layout under the data and install directories.
    pub fn standard(site: u32) -> Self {
        Self {
            workdir: paths::site_dir(site),
            image_dir: paths::image_dir(),
            temp_dir: paths::temp_dir(),
            enable_network_script: paths::enable_network_script(),
            setup_master_script: paths::setup_master_script(),
        }
    }
}

/// External systems a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn VirtProvider>,
    pub remote: RemoteChannel,
    pub images: Arc<dyn ImageBuilder>,
    pub reporter: Arc<dyn StepReporter>,
}

/// Parameters for a new deployment environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRequest {
    /// Defaults to `OpenStack Lab <site>`.
    pub name: Option<String>,
    pub release: String,
    pub deploy_mode: String,
    /// One of `nova`, `neutron-vlan`, `neutron-gre`.
    pub network_mode: String,
}

impl Default for EnvironmentRequest {
    fn default() -> Self {
        Self {
            name: None,
            release: DEFAULT_RELEASE.to_string(),
            deploy_mode: "ha".to_string(),
            network_mode: "neutron-vlan".to_string(),
        }
    }
}

/// Orchestrates one site.
pub struct SiteController {
    config: BenchConfig,
    site: Site,
    layout: SiteLayout,
    provider: Arc<dyn VirtProvider>,
    remote: RemoteChannel,
    images: Arc<dyn ImageBuilder>,
    reporter: Arc<dyn StepReporter>,
    base_image: Option<PathBuf>,
}

impl SiteController {
    pub fn new(site_id: u32, config: BenchConfig, layout: SiteLayout, collaborators: Collaborators) -> Result<Self> {
        let site = Site::new(site_id, layout.workdir.clone(), &config)?;
        Ok(Self {
            config,
            site,
            layout,
            provider: collaborators.provider,
            remote: collaborators.remote,
            images: collaborators.images,
            reporter: collaborators.reporter,
            base_image: None,
        })
    }

    /// Controller wired to libvirt, SSH and the remastering script.
    pub fn with_defaults(site_id: u32, config: BenchConfig, reporter: Arc<dyn StepReporter>) -> Result<Self> {
        let runner = CommandRunner::new(paths::console_log());
        let plan_site = Site::new(site_id, paths::site_dir(site_id), &config)?;

        let collaborators = Collaborators {
            provider: Arc::new(VirshProvider::new(&config.libvirt_uri, &config.storage_pool, runner.clone())),
            remote: RemoteChannel::single(Arc::new(SshShell::new(
                plan_site.plan.master_ip.clone(),
                config.ssh_port,
                &config.master_user,
                &config.master_pass,
            ))),
            images: Arc::new(ScriptImageBuilder::new(
                paths::make_iso_script(),
                paths::temp_dir(),
                &config.fuel_version_file,
                runner,
            )),
            reporter,
        };

        Self::new(site_id, config, SiteLayout::standard(site_id), collaborators)
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    fn master_vm(&self) -> String {
        self.site.vm_name(&self.config.master_name)
    }

    async fn step<T, F>(&self, label: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.reporter.begin(label);
        let result = work.await;
        let status = match &result {
            Ok(_) => StepStatus::Ok,
            Err(e) => StepStatus::from_error(e),
        };
        self.reporter.finish(label, status);
        result
    }

    fn make_workspace(&self) -> Result<()> {
        std::fs::create_dir_all(&self.site.workdir).map_err(|e| BenchError::io(&self.site.workdir, e))
    }

    fn adopt_version(&mut self, version: String) -> Result<&'static ConsoleRelease> {
        let meta = releases::lookup(&version)?;
        self.site.set_version(version, &self.config);
        Ok(meta)
    }

    /// Read and validate the console version of an installer image.
    #[instrument(skip(self), fields(site = self.site.id))]
    pub async fn check_image(&mut self, image: &Path) -> Result<&'static ConsoleRelease> {
        let version = self.images.read_version(image).await?;
        let meta = self.adopt_version(version)?;
        self.base_image = Some(image.to_path_buf());
        Ok(meta)
    }

    /// Read and validate the console version of the running management node.
    #[instrument(skip(self), fields(site = self.site.id))]
    pub async fn check_master(&mut self) -> Result<&'static ConsoleRelease> {
        let version = tasks::console_version(&self.remote).await?.unwrap_or_default();
        self.adopt_version(version)
    }

    /// Build the management node from the checked installer image.
    ///
    /// The transient custom image is removed on every exit path.
    #[instrument(skip(self, overrides), fields(site = self.site.id))]
    pub async fn create_master(&mut self, overrides: &MasterOverrides) -> Result<()> {
        let base = self
            .base_image
            .clone()
            .ok_or_else(|| BenchError::validation("No installer image checked for this site"))?;
        let meta = releases::lookup(&self.site.version)?;
        let config = self.config.with_master_overrides(overrides);

        std::fs::create_dir_all(&self.layout.temp_dir).map_err(|e| BenchError::io(&self.layout.temp_dir, e))?;
        let image = tempfile::Builder::new()
            .prefix(&format!("site{}-custom.", self.site.id))
            .suffix(".iso")
            .tempfile_in(&self.layout.temp_dir)
            .map_err(|e| BenchError::io(&self.layout.temp_dir, e))?
            .into_temp_path();
        let image_path = image.to_path_buf();

        let result = self.install_master(&config, meta, &base, &image_path).await;

        if let Err(e) = image.close() {
            if e.kind() != ErrorKind::NotFound {
                warn!(image = %image_path.display(), error = %e, "Failed to remove custom image");
                self.reporter
                    .note(&format!("Warning: ISO image {} still exists!", image_path.display()));
            }
        }

        if result.is_ok() {
            metrics::counter!("fuelbench_masters_created_total").increment(1);
        }
        result
    }

    async fn install_master(
        &mut self,
        config: &BenchConfig,
        meta: &ConsoleRelease,
        base: &Path,
        image: &Path,
    ) -> Result<()> {
        let id = self.site.id;
        let plan = self.site.plan.clone();
        let admin_gw = plan.admin_gateway().to_string();
        let admin_mask = plan.admin().netmask().unwrap_or_default().to_string();

        self.step("Cleaning up", async {
            self.provider.clean_vms(id).await?;
            self.provider.clean_networks(id).await
        })
        .await?;

        let networks = self
            .step("Creating virtual networks", self.provider.create_networks(id, &plan.networks))
            .await?;

        let request = ImageRequest {
            source: base.to_path_buf(),
            workdir: self.layout.image_dir.join(format!("site{}-custom", id)),
            ipaddr: plan.master_ip.clone(),
            gateway: admin_gw.clone(),
            dns: admin_gw,
            netmask: admin_mask,
            hostname: config.master_hostname.clone(),
        };
        self.step("Making the custom ISO image", self.images.build(&request, image)).await?;

        let spec = VmInstallSpec {
            name: self.master_vm(),
            vcpus: config.master_cpu,
            ram_mb: config.master_ram,
            disk_gb: config.master_disk,
            boot: BootMode::Image(image.to_path_buf()),
            networks,
            os_variant: meta.master_os.to_string(),
            wait_minutes: Some(config.vm_install_wait),
            delete_media: true,
            persistent_network_boot: false,
        };
        self.step("Installing Fuel Master node", self.provider.install_vm(id, &spec)).await?;

        self.wait_for_master(config.operational_timeout()).await?;

        self.site.disable_master_public = config.disable_public;
        if !config.disable_public {
            let public = plan.public();
            let args = [
                PUBLIC_NET.to_string(),
                plan.public_master_ip.clone(),
                public.netmask().unwrap_or_default().to_string(),
                plan.public_gateway().to_string(),
                plan.public_gateway().to_string(),
                config.search_domain.clone(),
                plan.public_cidr().to_string(),
            ];
            self.step(
                "Enabling outbound network/internet access for the product VM",
                self.run_remote_script(&self.layout.enable_network_script, &args),
            )
            .await?;
        }

        self.step(
            "Setting up Fuel Master VM",
            self.run_remote_script(&self.layout.setup_master_script, &[]),
        )
        .await?;

        if !config.disable_snapshot {
            self.shutdown_master(config.poweroff_timeout()).await?;
            let master = self.master_vm();
            self.step(
                "Creating snapshot for Fuel Master recovery",
                self.provider.create_snapshot(&master, RECOVERY_SNAPSHOT, "snapshot for fuel recovery"),
            )
            .await?;
            self.start_master().await?;
            self.wait_for_master(config.operational_timeout()).await?;
        }

        info!(site = id, "Management node ready");
        Ok(())
    }

    /// Install the next workload node, network-booted, with the site's release OS.
    #[instrument(skip(self, overrides), fields(site = self.site.id))]
    pub async fn create_slave(&self, overrides: &SlaveOverrides) -> Result<String> {
        let meta = releases::lookup(&self.site.version)?;
        let release = meta.release(self.site.release.as_deref().unwrap_or(DEFAULT_RELEASE))?;
        let config = self.config.with_slave_overrides(overrides);
        let id = self.site.id;

        let ordinal = self.provider.next_node_ordinal(id).await?;
        let short = format!("node-{}", ordinal);
        let networks = self.provider.list_networks(id).await?;

        let spec = VmInstallSpec {
            name: self.site.vm_name(&short),
            vcpus: config.slave_cpu,
            ram_mb: config.slave_ram,
            disk_gb: config.slave_disk,
            boot: BootMode::Network,
            networks,
            os_variant: release.os_variant.to_string(),
            wait_minutes: None,
            delete_media: false,
            persistent_network_boot: true,
        };

        self.step(&format!("Creating {} on site {}", short, id), self.provider.install_vm(id, &spec))
            .await
    }

    /// Choose the release used for workload nodes.
    pub fn set_release(&mut self, name: &str) -> Result<()> {
        releases::lookup(&self.site.version)?.release(name)?;
        self.site.release = Some(name.to_string());
        Ok(())
    }

    /// Remove every VM and network of the site.
    pub async fn clean_all(&self) -> Result<()> {
        let id = self.site.id;
        self.step("Cleaning up", async {
            self.provider.clean_vms(id).await?;
            self.provider.clean_networks(id).await
        })
        .await
    }

    /// Remove every VM of the site except the management node.
    pub async fn clean_slaves(&self) -> Result<()> {
        self.step("Removing slave nodes", self.provider.clean_slave_vms(self.site.id)).await
    }

    pub async fn list_vms(&self) -> Result<Vec<String>> {
        self.provider.list_vms(self.site.id).await
    }

    pub async fn master_vms(&self) -> Result<Vec<String>> {
        Ok(self.list_vms().await?.into_iter().filter(|vm| is_master(vm)).collect())
    }

    pub async fn slave_vms(&self) -> Result<Vec<String>> {
        Ok(self.list_vms().await?.into_iter().filter(|vm| !is_master(vm)).collect())
    }

    pub async fn list_networks(&self) -> Result<Vec<String>> {
        self.provider.list_networks(self.site.id).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        tasks::list_nodes(&self.remote).await
    }

    /// Nodes discovered by the console and not yet assigned.
    pub async fn pending_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.list_nodes().await?.into_iter().filter(NodeRecord::is_discovered).collect())
    }

    pub async fn list_environments(&self) -> Result<Vec<EnvironmentRecord>> {
        tasks::list_environments(&self.remote).await
    }

    /// Create an environment and seed its network and settings documents.
    ///
    /// The network mode is validated before anything runs remotely.
    #[instrument(skip(self), fields(site = self.site.id))]
    pub async fn create_environment(&mut self, request: &EnvironmentRequest) -> Result<(String, u32)> {
        let network: tasks::NetworkMode = request.network_mode.parse()?;
        let meta = releases::lookup(&self.site.version)?;
        let release = meta.release(&request.release)?;

        self.make_workspace()?;
        let name = request.name.clone().unwrap_or_else(|| format!("OpenStack Lab {}", self.site.id));

        let env_id = tasks::create_environment(&self.remote, &name, release.id, &request.deploy_mode, network)
            .await?
            .ok_or_else(|| BenchError::fuel_server("Environment not found"))?;

        let plan = &self.site.plan;
        tasks::configure_environment(
            &self.remote,
            &self.site.workdir,
            env_id,
            &PublicNetwork::from_plan(plan),
            plan.public_gateway(),
        )
        .await?;

        self.site.env_name = Some(name.clone());
        self.site.env_id = Some(env_id);
        self.site.release = Some(request.release.clone());
        metrics::counter!("fuelbench_environments_created_total").increment(1);
        info!(env_id, name = %name, "Environment created");
        Ok((name, env_id))
    }

    /// Target an existing environment for node and deploy operations.
    pub async fn select_environment(&mut self, env_id: u32) -> Result<EnvironmentRecord> {
        let env = self
            .list_environments()
            .await?
            .into_iter()
            .find(|e| e.id == env_id)
            .ok_or_else(|| BenchError::fuel_server(format!("Environment {} not found", env_id)))?;

        let release = releases::lookup(&self.site.version)
            .ok()
            .and_then(|meta| meta.releases.iter().find(|r| Some(r.id) == env.release_id))
            .map(|r| r.name.to_string());

        self.site.env_name = Some(env.name.clone());
        self.site.env_id = Some(env.id);
        self.site.release = release;
        Ok(env)
    }

    fn current_env(&self) -> Result<u32> {
        self.site
            .env_id
            .ok_or_else(|| BenchError::validation("No environment selected for this site"))
    }

    /// Assign roles to nodes and configure each for the current environment.
    #[instrument(skip(self), fields(site = self.site.id))]
    pub async fn add_nodes(&self, node_ids: &[u32], roles: &[String]) -> Result<()> {
        if node_ids.is_empty() {
            return Ok(());
        }
        let env_id = self.current_env()?;
        self.make_workspace()?;

        tasks::set_node_roles(&self.remote, env_id, node_ids, roles).await?;
        for &node_id in node_ids {
            tasks::configure_node(&self.remote, &self.site.workdir, node_id, env_id, self.site.plan.admin_gateway())
                .await?;
        }

        self.reporter.note(&format!(
            "Nodes {:?} with roles {:?} were added to environment {}",
            node_ids, roles, env_id
        ));
        Ok(())
    }

    pub async fn deploy_changes(&self) -> Result<()> {
        let env_id = self.current_env()?;
        self.step("Deploying changes to environment", tasks::deploy_changes(&self.remote, env_id))
            .await
    }

    /// Upload a local script to the management node, run it, remove it.
    pub async fn run_remote_script(&self, script: &Path, args: &[String]) -> Result<String> {
        tasks::run_script(&self.remote, script, args).await
    }

    /// Wait for the management node to finish bootstrapping.
    pub async fn wait_for_master(&self, timeout: Duration) -> Result<()> {
        let remote = &self.remote;
        let spec = PollSpec::operational().with_timeout(timeout);
        self.step(
            "Waiting for product VM operational",
            poll_until(
                &spec,
                "master operational",
                move || tasks::bootstrap_complete(remote),
                || BenchError::fuel_server("Wait for product VM timeout"),
            ),
        )
        .await
    }

    /// Wait until the console answers environment listings.
    pub async fn wait_for_console(&self, timeout: Duration) -> Result<()> {
        let spec = PollSpec::readiness().with_timeout(timeout);
        self.step(
            "Waiting for Fuel server ready",
            poll_until(
                &spec,
                "console ready",
                move || async move { Ok::<_, BenchError>(self.is_console_ready().await) },
                || BenchError::fuel_server("Wait for fuel server timeout"),
            ),
        )
        .await
    }

    /// Whether the environment listing command runs successfully.
    pub async fn is_console_ready(&self) -> bool {
        match tasks::console_answers(&self.remote).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Console not ready");
                false
            }
        }
    }

    /// Power off the management node and wait until it is inactive.
    ///
    /// Returns immediately when it is already off.
    #[instrument(skip(self), fields(site = self.site.id))]
    pub async fn shutdown_master(&self, timeout: Duration) -> Result<()> {
        let master = self.master_vm();
        if !self.provider.is_active(&master).await? {
            return Ok(());
        }

        let provider = &self.provider;
        let name = master.as_str();
        let spec = PollSpec::power_off().with_timeout(timeout);
        self.step("Shutting down fuel master", async {
            tasks::power_off(&self.remote).await?;
            poll_until(
                &spec,
                "master power-off",
                move || async move { provider.is_active(name).await.map(|active| !active) },
                || BenchError::fuel_server("Shutdown fuel master timeout"),
            )
            .await
        })
        .await
    }

    /// Start the management node if it is not running.
    pub async fn start_master(&self) -> Result<()> {
        let master = self.master_vm();
        self.step("Starting fuel master", async {
            if !self.provider.is_active(&master).await? {
                self.provider.start_vm(&master).await?;
            }
            Ok::<(), BenchError>(())
        })
        .await
    }

    /// Revert the management node to its recovery snapshot and bring it back up.
    #[instrument(skip(self), fields(site = self.site.id))]
    pub async fn restore_master(&self) -> Result<()> {
        let master = self.master_vm();
        self.step(
            "Restoring fuel master",
            self.provider.revert_snapshot(&master, RECOVERY_SNAPSHOT),
        )
        .await?;
        self.start_master().await?;
        self.wait_for_master(self.config.operational_timeout()).await
    }

    /// Access summary as seen from `host_ip`.
    pub fn access_info(&self, host_ip: &str) -> AccessInfo {
        AccessInfo::new(&self.site, &self.config, host_ip)
    }
}
