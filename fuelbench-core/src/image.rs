//! Installer image handling.
//!
//! The management node is installed from a remastered copy of the vendor ISO
//! with its network identity baked in. Remastering is delegated to a shell
//! script; version detection reads `version.yaml` out of the image.

use crate::command::CommandRunner;
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Network identity written into a custom installer image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Vendor ISO to remaster.
    pub source: PathBuf,
    /// Scratch directory for the unpacked image.
    pub workdir: PathBuf,
    pub ipaddr: String,
    pub gateway: String,
    pub dns: String,
    pub netmask: String,
    pub hostname: String,
}

/// Builds custom installer images and reads their version.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Console version shipped in `image`.
    async fn read_version(&self, image: &Path) -> Result<String>;

    /// Write a customized copy of `request.source` to `output`.
    async fn build(&self, request: &ImageRequest, output: &Path) -> Result<()>;
}

/// [`ImageBuilder`] backed by the remastering script and `bsdtar`.
#[derive(Debug, Clone)]
pub struct ScriptImageBuilder {
    script: PathBuf,
    temp_dir: PathBuf,
    version_file: String,
    runner: CommandRunner,
}

impl ScriptImageBuilder {
    pub fn new(
        script: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        version_file: impl Into<String>,
        runner: CommandRunner,
    ) -> Self {
        Self {
            script: script.into(),
            temp_dir: temp_dir.into(),
            version_file: version_file.into(),
            runner,
        }
    }
}

#[async_trait]
impl ImageBuilder for ScriptImageBuilder {
    #[instrument(skip(self))]
    async fn read_version(&self, image: &Path) -> Result<String> {
        if !image.is_file() {
            return Err(BenchError::validation(format!("ISO image not found: {}", image.display())));
        }

        tokio::fs::create_dir_all(&self.temp_dir).await.map_err(|e| BenchError::io(&self.temp_dir, e))?;
        let scratch = tempfile::tempdir_in(&self.temp_dir).map_err(|e| BenchError::io(&self.temp_dir, e))?;

        let args = vec![
            "-xf".to_string(),
            image.display().to_string(),
            "-C".to_string(),
            scratch.path().display().to_string(),
            self.version_file.clone(),
        ];
        self.runner.run("bsdtar", &args).await?;

        let path = scratch.path().join(&self.version_file);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| BenchError::io(&path, e))?;
        let version = parse_version_file(&text)
            .map_err(|source| BenchError::Yaml { path: path.clone(), source })?
            .ok_or_else(|| BenchError::validation(format!("No VERSION.release in {}", image.display())))?;

        info!(version = %version, "Read image version");
        Ok(version)
    }

    #[instrument(skip(self, request), fields(source = %request.source.display()))]
    async fn build(&self, request: &ImageRequest, output: &Path) -> Result<()> {
        let args = vec![
            "-xe".to_string(),
            self.script.display().to_string(),
            request.source.display().to_string(),
            output.display().to_string(),
            request.workdir.display().to_string(),
            request.ipaddr.clone(),
            request.gateway.clone(),
            request.dns.clone(),
            request.netmask.clone(),
            request.hostname.clone(),
        ];
        self.runner.run("bash", &args).await?;
        metrics::counter!("fuelbench_images_built_total").increment(1);
        info!(output = %output.display(), "Custom image built");
        Ok(())
    }
}

/// `VERSION.release` as text; numeric releases like `6.1` are kept verbatim.
pub fn parse_version_file(text: &str) -> std::result::Result<Option<String>, serde_yaml::Error> {
    let doc: Value = serde_yaml::from_str(text)?;
    Ok(match &doc["VERSION"]["release"] {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_file() {
        let quoted = "VERSION:\n  feature_groups:\n    - mirantis\n  release: \"6.1\"\n  api: \"1.0\"\n";
        assert_eq!(parse_version_file(quoted).unwrap().as_deref(), Some("6.1"));

        let bare = "VERSION:\n  release: 7.0\n";
        assert_eq!(parse_version_file(bare).unwrap().as_deref(), Some("7.0"));

        assert_eq!(parse_version_file("VERSION: {}\n").unwrap(), None);
        assert!(parse_version_file("VERSION: [").is_err());
    }

    #[tokio::test]
    async fn test_build_runs_script_with_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("make-iso.sh");
        // echo the arguments into the output file
        std::fs::write(&script, "echo \"$@\" > \"$2\"\n").unwrap();

        let builder = ScriptImageBuilder::new(&script, dir.path(), "version.yaml", CommandRunner::without_log());
        let output = dir.path().join("out.iso");
        let request = ImageRequest {
            source: PathBuf::from("/srv/fuel-6.1.iso"),
            workdir: dir.path().join("site1-custom"),
            ipaddr: "10.20.1.2".to_string(),
            gateway: "10.20.1.1".to_string(),
            dns: "10.20.1.1".to_string(),
            netmask: "255.255.255.0".to_string(),
            hostname: "fuel.site1.lab".to_string(),
        };

        builder.build(&request, &output).await.unwrap();
        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.starts_with("/srv/fuel-6.1.iso "));
        assert!(written.trim_end().ends_with("10.20.1.2 10.20.1.1 10.20.1.1 255.255.255.0 fuel.site1.lab"));
    }

    #[tokio::test]
    async fn test_missing_image_is_rejected() {
        let builder = ScriptImageBuilder::new("/bin/true", "/tmp", "version.yaml", CommandRunner::without_log());
        let err = builder.read_version(Path::new("/nonexistent/fuel.iso")).await.unwrap_err();
        assert!(matches!(err, BenchError::Validation { .. }));
    }
}
