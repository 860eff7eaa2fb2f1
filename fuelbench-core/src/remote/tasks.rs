//! Console operations run on the management node.

use super::{quote_path, RemoteChannel, Visibility};
use crate::error::{BenchError, Result};
use crate::parser::{self, EnvironmentRecord, NodeRecord};
use crate::pipeline::{self, transforms, Artifact};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument};

static ENV_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Environment .*\bid=(\d+)\b").expect("valid regex"));
static BOOTSTRAP_DONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Fuel.*complete.*").expect("valid regex"));

const VERSION_COMMAND: &str =
    r#"awk -F': ' '/release/ {print $2}' /etc/fuel/version.yaml | sed -e 's/^["]*//' | sed -e 's/["]*$//'"#;
const BOOTSTRAP_LOG_COMMAND: &str =
    "grep 'Fuel node deployment' /var/log/puppet/bootstrap_admin_node.log";

/// Network topology of a new environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Nova,
    NeutronVlan,
    NeutronGre,
}

impl NetworkMode {
    fn cli_flags(self) -> &'static str {
        match self {
            Self::Nova => " --net nova",
            Self::NeutronVlan => " --net neutron --nst vlan",
            Self::NeutronGre => " --net neutron --nst gre",
        }
    }
}

impl FromStr for NetworkMode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nova" => Ok(Self::Nova),
            "neutron-vlan" => Ok(Self::NeutronVlan),
            "neutron-gre" => Ok(Self::NeutronGre),
            other => Err(BenchError::validation(format!("Unsupported network mode: {}", other))),
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nova => "nova",
            Self::NeutronVlan => "neutron-vlan",
            Self::NeutronGre => "neutron-gre",
        })
    }
}

pub async fn list_nodes(channel: &RemoteChannel) -> Result<Vec<NodeRecord>> {
    let output = channel.run_one("fuel node --list", Visibility::Quiet).await?;
    Ok(parser::parse_node_table(&output))
}

pub async fn list_environments(channel: &RemoteChannel) -> Result<Vec<EnvironmentRecord>> {
    let output = channel.run_one("fuel env --list", Visibility::Quiet).await?;
    Ok(parser::parse_environment_table(&output))
}

/// Succeeds when the console runs the environment listing, whatever it prints.
pub async fn console_answers(channel: &RemoteChannel) -> Result<()> {
    channel.run_one("fuel env --list", Visibility::Quiet).await?;
    Ok(())
}

/// Command line creating an environment.
pub fn create_environment_command(name: &str, release_id: u32, mode: &str, network: NetworkMode) -> String {
    format!(
        "fuel env create --name '{}' --rel {} --mode {}{}",
        name.replace('\'', ""),
        release_id,
        mode,
        network.cli_flags()
    )
}

/// Create an environment. Returns its id, `None` when the console printed none.
#[instrument(skip(channel))]
pub async fn create_environment(
    channel: &RemoteChannel,
    name: &str,
    release_id: u32,
    mode: &str,
    network: NetworkMode,
) -> Result<Option<u32>> {
    let command = create_environment_command(name, release_id, mode, network);
    let output = channel.run_one(&command, Visibility::Quiet).await?;
    let id = output
        .lines()
        .find_map(|line| ENV_ID.captures(line))
        .and_then(|caps| caps[1].parse().ok());
    debug!(?id, "Environment created");
    Ok(id)
}

#[instrument(skip(channel))]
pub async fn set_node_roles(channel: &RemoteChannel, env_id: u32, node_ids: &[u32], roles: &[String]) -> Result<()> {
    let nodes = node_ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
    let command = format!("fuel --env {} node set --node {} --role {}", env_id, nodes, roles.join(","));
    channel.run_one(&command, Visibility::Quiet).await?;
    Ok(())
}

#[instrument(skip(channel))]
pub async fn deploy_changes(channel: &RemoteChannel, env_id: u32) -> Result<()> {
    channel
        .run_one(&format!("fuel --env {} deploy-changes", env_id), Visibility::Verbose)
        .await?;
    Ok(())
}

/// Version recorded on the management node, `None` when it printed nothing.
pub async fn console_version(channel: &RemoteChannel) -> Result<Option<String>> {
    let output = channel.run_one(VERSION_COMMAND, Visibility::Quiet).await?;
    Ok(parser::first_value(&output).map(String::from))
}

/// Whether the bootstrap log reports completion.
pub async fn bootstrap_complete(channel: &RemoteChannel) -> Result<bool> {
    let output = channel.run_one(BOOTSTRAP_LOG_COMMAND, Visibility::Quiet).await?;
    Ok(parser::any_line_matches(&output, &BOOTSTRAP_DONE))
}

pub async fn power_off(channel: &RemoteChannel) -> Result<()> {
    channel.sudo_one("poweroff", Visibility::Quiet).await?;
    Ok(())
}

/// Upload `script` to the remote home, run it with `args`, then remove it.
#[instrument(skip(channel, args), fields(script = %script.display()))]
pub async fn run_script(channel: &RemoteChannel, script: &Path, args: &[String]) -> Result<String> {
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BenchError::validation(format!("Not a script file: {}", script.display())))?;
    let remote = format!("~/{}", name);
    let hosts = channel.hosts().join(",");

    let written = channel.put(script, &remote).await?;
    if written.len() != 1 {
        return Err(BenchError::remote(hosts, format!("Failed to upload {}", name)));
    }

    let mut command = format!("sh {}", quote_path(&remote));
    for arg in args {
        command.push(' ');
        command.push_str(&super::quote(arg));
    }
    let output = channel.run_one(&command, Visibility::Verbose).await?;

    channel.run_one(&format!("rm -rf {}", quote_path(&remote)), Visibility::Quiet).await?;
    info!("Script finished");
    Ok(output)
}

/// Network and settings configuration of a new environment.
pub async fn configure_environment(
    channel: &RemoteChannel,
    workdir: &Path,
    env_id: u32,
    public: &transforms::PublicNetwork,
    upstream_dns: &str,
) -> Result<()> {
    pipeline::ensure_workspace(channel).await?;

    pipeline::mutate_remote_document(channel, workdir, &Artifact::network(env_id), |doc| {
        transforms::site_network(doc, public)
    })
    .await?;

    pipeline::mutate_remote_document(channel, workdir, &Artifact::settings(env_id), |doc| {
        transforms::site_settings(doc, upstream_dns)
    })
    .await?;
    Ok(())
}

/// Interface and provisioning configuration of a node joining `env_id`.
pub async fn configure_node(
    channel: &RemoteChannel,
    workdir: &Path,
    node_id: u32,
    env_id: u32,
    admin_gateway: &str,
) -> Result<()> {
    pipeline::ensure_workspace(channel).await?;

    pipeline::mutate_remote_document(channel, workdir, &Artifact::node_network(node_id), transforms::node_network)
        .await?;

    pipeline::mutate_remote_document(channel, workdir, &Artifact::node_provisioning(env_id, node_id), |doc| {
        transforms::node_provisioning(doc, admin_gateway)
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_mode() {
        assert_eq!("neutron-gre".parse::<NetworkMode>().unwrap(), NetworkMode::NeutronGre);
        assert!(matches!("bogus".parse::<NetworkMode>(), Err(BenchError::Validation { .. })));
        assert_eq!(NetworkMode::NeutronVlan.to_string(), "neutron-vlan");
    }

    #[test]
    fn test_create_command() {
        assert_eq!(
            create_environment_command("lab", 2, "ha_compact", NetworkMode::NeutronVlan),
            "fuel env create --name 'lab' --rel 2 --mode ha_compact --net neutron --nst vlan"
        );
        assert_eq!(
            create_environment_command("a'b", 1, "multinode", NetworkMode::Nova),
            "fuel env create --name 'ab' --rel 1 --mode multinode --net nova"
        );
    }

    #[test]
    fn test_env_id_pattern() {
        let out = "Environment 'lab' with id=12, mode=ha_compact and network-mode=neutron was created!";
        assert_eq!(&ENV_ID.captures(out).unwrap()[1], "12");
        assert!(ENV_ID.captures("Something else id=3").is_none());
    }
}
