//! Download, transform and upload of console configuration documents.
//!
//! Every document goes through the same steps:
//!
//! 1. run the download command inside the remote workspace
//! 2. find the artifact path in the command output
//! 3. fetch exactly one file into the local work directory
//! 4. parse, transform and rewrite it locally
//! 5. copy it back to the same remote path
//! 6. run the upload command
//!
//! Failure at any step aborts the pipeline; nothing is uploaded after a failed
//! transform.

use crate::error::{BenchError, Result};
use crate::remote::{RemoteChannel, Visibility};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

pub mod transforms;

/// Remote directory all downloads land in.
pub const REMOTE_WORKSPACE: &str = "~/fuelbench";

static NETWORK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Network configuration .* downloaded to\s+(.+)").expect("valid regex"));
static SETTINGS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Settings configuration .* downloaded to\s+(.+)").expect("valid regex"));
static INTERFACES_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Node attributes for interfaces were written to").expect("valid regex"));
static PROVISIONING_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Default provisioning info .*downloaded to\s+(.+)").expect("valid regex"));

/// Where the artifact path appears relative to the marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLocation {
    /// First capture group of the marker.
    Captured,
    /// The next non-empty line after the marker.
    NextLine,
}

/// One remotely managed configuration document.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Human name used in errors.
    pub label: String,
    pub download: String,
    pub marker: &'static Regex,
    pub location: PathLocation,
    /// File inside the located directory, when the marker names a directory.
    pub file_name: Option<String>,
    pub upload: String,
}

impl Artifact {
    /// Network configuration of an environment.
    pub fn network(env_id: u32) -> Self {
        Self {
            label: "Network configuration".to_string(),
            download: format!("fuel network --env {} network --download", env_id),
            marker: &NETWORK_MARKER,
            location: PathLocation::Captured,
            file_name: None,
            upload: format!("fuel --env {} network --upload", env_id),
        }
    }

    /// Settings of an environment.
    pub fn settings(env_id: u32) -> Self {
        Self {
            label: "Settings configuration".to_string(),
            download: format!("fuel --env {} settings --download", env_id),
            marker: &SETTINGS_MARKER,
            location: PathLocation::Captured,
            file_name: None,
            upload: format!("fuel --env {} settings --upload", env_id),
        }
    }

    /// Interface assignments of a node.
    pub fn node_network(node_id: u32) -> Self {
        Self {
            label: "Node network configuration".to_string(),
            download: format!("fuel node --node-id {} --network --download", node_id),
            marker: &INTERFACES_MARKER,
            location: PathLocation::NextLine,
            file_name: None,
            upload: format!("fuel node --node-id {} --network --upload", node_id),
        }
    }

    /// Default provisioning info of a node.
    pub fn node_provisioning(env_id: u32, node_id: u32) -> Self {
        Self {
            label: "Node provisioning configuration".to_string(),
            download: format!("fuel --env {} provisioning --default --node {}", env_id, node_id),
            marker: &PROVISIONING_MARKER,
            location: PathLocation::Captured,
            file_name: Some(format!("node-{}.yaml", node_id)),
            upload: format!("fuel --env {} provisioning --upload", env_id),
        }
    }

    /// Remote path of the document named in `output`, if the marker is present.
    pub fn locate(&self, output: &str) -> Option<String> {
        let mut lines = output.lines();
        let found = loop {
            let line = lines.next()?;
            match self.location {
                PathLocation::Captured => {
                    if let Some(caps) = self.marker.captures(line) {
                        break caps.get(1)?.as_str().trim().to_string();
                    }
                }
                PathLocation::NextLine => {
                    if self.marker.is_match(line) {
                        break lines.by_ref().map(str::trim).find(|l| !l.is_empty())?.to_string();
                    }
                }
            }
        };

        let path = match &self.file_name {
            Some(name) => format!("{}/{}", found.trim_end_matches('/'), name),
            None => found,
        };
        Some(in_workspace(&path))
    }
}

/// Relative paths are resolved against the remote workspace.
fn in_workspace(path: &str) -> String {
    if path.starts_with('/') || path.starts_with('~') {
        path.to_string()
    } else {
        format!("{}/{}", REMOTE_WORKSPACE, path)
    }
}

fn in_workspace_cmd(command: &str) -> String {
    format!("cd {} && {}", REMOTE_WORKSPACE, command)
}

/// Create the remote workspace directory.
pub async fn ensure_workspace(channel: &RemoteChannel) -> Result<()> {
    channel.run_one(&format!("mkdir -p {}", REMOTE_WORKSPACE), Visibility::Quiet).await?;
    Ok(())
}

/// Load a YAML document.
pub fn load_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
    serde_yaml::from_str(&text).map_err(|source| BenchError::Yaml { path: path.to_path_buf(), source })
}

/// Write a YAML document in block style.
pub fn save_document(path: &Path, doc: &Value) -> Result<()> {
    let text = serde_yaml::to_string(doc)
        .map_err(|source| BenchError::Yaml { path: path.to_path_buf(), source })?;
    std::fs::write(path, text).map_err(|e| BenchError::io(path, e))
}

/// Rewrite the document at `path` through `transform`. Returns the new document.
pub fn modify_document<F>(path: &Path, transform: F) -> Result<Value>
where
    F: FnOnce(Value) -> Result<Value>,
{
    let doc = transform(load_document(path)?)?;
    save_document(path, &doc)?;
    Ok(doc)
}

/// Run the full pipeline for one artifact.
#[instrument(skip(channel, artifact, transform), fields(artifact = %artifact.label))]
pub async fn mutate_remote_document<F>(
    channel: &RemoteChannel,
    workdir: &Path,
    artifact: &Artifact,
    transform: F,
) -> Result<Value>
where
    F: FnOnce(Value) -> Result<Value>,
{
    let hosts = channel.hosts().join(",");

    let output = channel.run_one(&in_workspace_cmd(&artifact.download), Visibility::Quiet).await?;
    let remote_path = artifact
        .locate(&output)
        .ok_or_else(|| BenchError::remote(&hosts, format!("{} file not found", artifact.label)))?;
    debug!(remote = %remote_path, "Located artifact");

    let local_path = single_file(channel.get(&remote_path, workdir).await?)
        .ok_or_else(|| BenchError::remote(&hosts, format!("Unable to get {}", remote_path)))?;

    let doc = modify_document(&local_path, transform)?;
    debug!(local = %local_path.display(), "Saved transformed document");

    channel.put(&local_path, &remote_path).await?;
    channel.run_one(&in_workspace_cmd(&artifact.upload), Visibility::Quiet).await?;

    metrics::counter!("fuelbench_documents_uploaded_total").increment(1);
    info!(remote = %remote_path, "Configuration uploaded");
    Ok(doc)
}

fn single_file(mut files: Vec<PathBuf>) -> Option<PathBuf> {
    if files.len() == 1 {
        files.pop()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_captured() {
        let out = "Network configuration for environment with id=4 downloaded to /root/fuelbench/network_4.yaml\n";
        assert_eq!(Artifact::network(4).locate(out).unwrap(), "/root/fuelbench/network_4.yaml");

        let out = "Settings configuration for environment with id=4 downloaded to settings_4.yaml";
        assert_eq!(Artifact::settings(4).locate(out).unwrap(), "~/fuelbench/settings_4.yaml");
    }

    #[test]
    fn test_locate_next_line() {
        let out = "noise\nNode attributes for interfaces were written to:\n\n  /root/fuelbench/node_7/interfaces.yaml\n";
        assert_eq!(
            Artifact::node_network(7).locate(out).unwrap(),
            "/root/fuelbench/node_7/interfaces.yaml"
        );
        let truncated = "Node attributes for interfaces were written to:\n";
        assert!(Artifact::node_network(7).locate(truncated).is_none());
    }

    #[test]
    fn test_locate_directory_join() {
        let out = "Default provisioning info for environment 2 downloaded to /root/fuelbench/provisioning_2/";
        assert_eq!(
            Artifact::node_provisioning(2, 9).locate(out).unwrap(),
            "/root/fuelbench/provisioning_2/node-9.yaml"
        );
    }

    #[test]
    fn test_locate_missing_marker() {
        assert!(Artifact::network(1).locate("Error: not found\n").is_none());
    }

    #[test]
    fn test_commands() {
        assert_eq!(Artifact::network(3).download, "fuel network --env 3 network --download");
        assert_eq!(Artifact::network(3).upload, "fuel --env 3 network --upload");
        assert_eq!(Artifact::settings(3).download, "fuel --env 3 settings --download");
        assert_eq!(Artifact::node_network(5).upload, "fuel node --node-id 5 --network --upload");
        assert_eq!(
            Artifact::node_provisioning(3, 5).download,
            "fuel --env 3 provisioning --default --node 5"
        );
    }

    #[test]
    fn test_document_round_trip_keeps_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "editable:\n  common:\n    libvirt_type:\n      value: qemu\n      values: [kvm, qemu]\n    debug:\n      value: false\n  external_dns:\n    dns_list:\n      value: 8.8.8.8\n  storage:\n    volumes_lvm: {value: true}\nzeta: 1\nalpha: 2\n",
        )
        .unwrap();

        let before = load_document(&path).unwrap();
        modify_document(&path, |doc| transforms::site_settings(doc, "172.16.1.1")).unwrap();
        let after = load_document(&path).unwrap();

        assert_eq!(after["editable"]["storage"], before["editable"]["storage"]);
        assert_eq!(after["editable"]["common"]["libvirt_type"]["values"], before["editable"]["common"]["libvirt_type"]["values"]);

        // key order survives the rewrite
        let keys: Vec<_> = after.as_mapping().unwrap().keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, vec!["editable", "zeta", "alpha"]);
    }

    #[test]
    fn test_failed_transform_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interfaces.yaml");
        let original = "- name: eth0\n  assigned_networks: []\n";
        std::fs::write(&path, original).unwrap();

        assert!(modify_document(&path, transforms::node_network).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }
}
