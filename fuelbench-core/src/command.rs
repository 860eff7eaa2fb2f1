//! Local external-process execution.
//!
//! Every helper tool (virsh, virt-install, the ISO remastering script, bsdtar)
//! runs through [`CommandRunner`]. Output is appended to the console log and a
//! non-zero exit is turned into [`BenchError::CommandFailure`] right here, with
//! the command text and exit code attached.

use crate::error::{BenchError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs local commands, teeing their output into a console log file.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    console_log: Option<PathBuf>,
}

impl CommandRunner {
    /// Runner that appends command output to `console_log`.
    pub fn new(console_log: impl Into<PathBuf>) -> Self {
        Self { console_log: Some(console_log.into()) }
    }

    /// Runner that keeps output in memory only.
    pub fn without_log() -> Self {
        Self { console_log: None }
    }

    /// Run `program args...` and return its stdout.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let cmdline = render(program, args);
        debug!(command = %cmdline, "Execute");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                metrics::counter!("fuelbench_command_failures_total", "program" => program.to_string())
                    .increment(1);
                warn!(command = %cmdline, error = %e, "Failed to spawn");
                // 127 mirrors what a shell reports for a missing program
                BenchError::command(cmdline.clone(), 127)
            })?;

        self.append_log(&cmdline, &output.stdout, &output.stderr).await;

        let code = output.status.code().unwrap_or(-1);
        debug!(command = %cmdline, code, "Return code");

        if !output.status.success() {
            metrics::counter!("fuelbench_command_failures_total", "program" => program.to_string())
                .increment(1);
            return Err(BenchError::command(cmdline, code));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn append_log(&self, cmdline: &str, stdout: &[u8], stderr: &[u8]) {
        let Some(path) = &self.console_log else { return };

        if let Err(e) = write_log(path, cmdline, stdout, stderr).await {
            warn!(path = %path.display(), error = %e, "Failed to write console log");
        }
    }
}

async fn write_log(path: &Path, cmdline: &str, stdout: &[u8], stderr: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut log = OpenOptions::new().create(true).append(true).open(path).await?;
    log.write_all(format!("+ {}\n", cmdline).as_bytes()).await?;
    log.write_all(stdout).await?;
    log.write_all(stderr).await?;
    log.flush().await
}

/// Render a command line for logs and error messages.
pub fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string()).chain(args.iter().cloned()).collect::<Vec<_>>().join(" ")
}
