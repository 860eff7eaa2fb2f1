use anyhow::Result;
use clap::{Parser, Subcommand};
use fuelbench_core::{NetworkMode, NodeProfile};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "fuelbench")]
#[command(about = "Provision and operate virtual OpenStack lab sites", long_about = None)]
struct Cli {
    /// Site number
    #[arg(short, long, global = true, env = "FUELBENCH_SITE", default_value = "1")]
    site: u32,

    /// Configuration file (defaults to the install tree's conf/fuelbench.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the Fuel master node from an installer image
    CreateMaster {
        /// Installer ISO (defaults to the configured image)
        #[arg(short, long)]
        iso: Option<PathBuf>,

        #[arg(long)]
        cpu: Option<u32>,

        /// Memory in MB
        #[arg(long)]
        ram: Option<u32>,

        /// Disk size in GB
        #[arg(long)]
        disk: Option<u32>,

        /// Minutes to wait for the OS installation
        #[arg(long)]
        install_wait: Option<u32>,

        /// Leave the master's public interface disabled
        #[arg(long)]
        disable_public: bool,

        /// Skip the recovery snapshot
        #[arg(long)]
        disable_snapshot: bool,
    },

    /// Create network-booted slave nodes
    CreateSlave {
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Sizing profile: controller, compute or storage
        #[arg(short, long)]
        profile: Option<NodeProfile>,

        /// Release whose OS hint the nodes use
        #[arg(short, long)]
        release: Option<String>,

        #[arg(long)]
        cpu: Option<u32>,

        /// Memory in MB
        #[arg(long)]
        ram: Option<u32>,

        /// Disk size in GB
        #[arg(long)]
        disk: Option<u32>,
    },

    /// Remove all VMs and networks of the site
    Clean,

    /// Remove all slave VMs of the site
    CleanSlaves,

    /// List the site's VMs
    Vms,

    /// List nodes known to the Fuel console
    Nodes {
        /// Only nodes not yet assigned to an environment
        #[arg(long)]
        pending: bool,
    },

    /// List environments
    Envs,

    /// Create a deployment environment
    CreateEnv {
        #[arg(long)]
        name: Option<String>,

        #[arg(short, long, default_value = "ubuntu")]
        release: String,

        /// Deployment mode
        #[arg(short, long, default_value = "ha")]
        mode: String,

        /// nova, neutron-vlan or neutron-gre
        #[arg(long, default_value = "neutron-vlan")]
        net: NetworkMode,
    },

    /// Assign roles to nodes in an environment
    AddNodes {
        /// Environment ID
        #[arg(short, long)]
        env: u32,

        /// Node IDs (comma separated)
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<u32>,

        /// Roles (comma separated)
        #[arg(long, value_delimiter = ',', required = true)]
        roles: Vec<String>,
    },

    /// Deploy pending changes of an environment
    Deploy {
        /// Environment ID
        #[arg(short, long)]
        env: u32,
    },

    /// Power off the master node
    Shutdown,

    /// Start the master node
    Start,

    /// Revert the master node to its recovery snapshot
    Restore,

    /// Wait until the master node is operational
    Wait {
        /// Wait for the console API instead of the bootstrap log
        #[arg(long)]
        console: bool,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show how to reach the site
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = commands::Context::init(cli.site, cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::CreateMaster { iso, cpu, ram, disk, install_wait, disable_public, disable_snapshot } => {
            let overrides = fuelbench_core::MasterOverrides {
                cpu,
                ram,
                disk,
                install_wait,
                disable_public: disable_public.then_some(true),
                disable_snapshot: disable_snapshot.then_some(true),
            };
            commands::master::create(&ctx, iso, &overrides).await?;
        }

        Commands::CreateSlave { count, profile, release, cpu, ram, disk } => {
            let sizing = fuelbench_core::SlaveOverrides { cpu, ram, disk };
            commands::nodes::create_slaves(&ctx, count, profile, release.as_deref(), sizing).await?;
        }

        Commands::Clean => {
            ctx.controller()?.clean_all().await?;
        }

        Commands::CleanSlaves => {
            ctx.controller()?.clean_slaves().await?;
        }

        Commands::Vms => {
            commands::nodes::vms(&ctx).await?;
        }

        Commands::Nodes { pending } => {
            commands::nodes::nodes(&ctx, pending).await?;
        }

        Commands::Envs => {
            commands::envs::envs(&ctx).await?;
        }

        Commands::CreateEnv { name, release, mode, net } => {
            let request = fuelbench_core::EnvironmentRequest { name, release, deploy_mode: mode, network_mode: net.to_string() };
            commands::envs::create(&ctx, &request).await?;
        }

        Commands::AddNodes { env, nodes, roles } => {
            commands::envs::add_nodes(&ctx, env, &nodes, &roles).await?;
        }

        Commands::Deploy { env } => {
            commands::envs::deploy(&ctx, env).await?;
        }

        Commands::Shutdown => {
            let controller = ctx.controller()?;
            let timeout = controller.config().poweroff_timeout();
            controller.shutdown_master(timeout).await?;
        }

        Commands::Start => {
            ctx.controller()?.start_master().await?;
        }

        Commands::Restore => {
            ctx.controller()?.restore_master().await?;
        }

        Commands::Wait { console, timeout } => {
            commands::master::wait(&ctx, console, timeout).await?;
        }

        Commands::Info => {
            commands::master::info(&ctx).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_env_rejects_unknown_network_mode() {
        let err = Cli::try_parse_from(["fuelbench", "create-env", "--net", "bogus"]).err().unwrap();
        assert!(err.to_string().contains("Unsupported network mode: bogus"));
    }

    #[test]
    fn test_create_env_parses_network_mode() {
        let cli = Cli::try_parse_from(["fuelbench", "create-env", "--net", "neutron-gre"]).unwrap();
        match cli.command {
            Commands::CreateEnv { net, .. } => assert_eq!(net, NetworkMode::NeutronGre),
            _ => panic!("unexpected command"),
        }

        let cli = Cli::try_parse_from(["fuelbench", "create-env"]).unwrap();
        match cli.command {
            Commands::CreateEnv { net, .. } => assert_eq!(net, NetworkMode::NeutronVlan),
            _ => panic!("unexpected command"),
        }
    }
}
