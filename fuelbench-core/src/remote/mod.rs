//! Remote command channel.
//!
//! Commands run on the management node through a [`RemoteShell`]. The
//! [`RemoteChannel`] fans a command out over its target hosts, returns a
//! host-to-output map and turns every failure (non-zero exit, lost session,
//! failed transfer) into [`BenchError::RemoteTask`].

use crate::error::{BenchError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub mod ssh;
pub mod tasks;

pub use ssh::SshShell;

/// Combined output and exit status of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: String,
    pub exit_status: u32,
}

/// A session to one remote host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// `user@address` label used in results and errors.
    fn host(&self) -> &str;

    /// Run a shell command, stdout and stderr combined.
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Copy the remote file(s) matching `remote_path` into `local_dir`.
    async fn get(&self, remote_path: &str, local_dir: &Path) -> Result<Vec<PathBuf>>;

    /// Copy a local file to `remote_path`. Returns the remote paths written.
    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<Vec<String>>;
}

/// Whether remote output is echoed to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    Verbose,
    #[default]
    Quiet,
}

/// Runs commands against a fixed set of hosts.
#[derive(Clone)]
pub struct RemoteChannel {
    shells: Vec<Arc<dyn RemoteShell>>,
}

impl RemoteChannel {
    pub fn new(shells: Vec<Arc<dyn RemoteShell>>) -> Self {
        Self { shells }
    }

    /// Channel targeting a single host.
    pub fn single(shell: Arc<dyn RemoteShell>) -> Self {
        Self { shells: vec![shell] }
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.shells.iter().map(|s| s.host()).collect()
    }

    /// Run `command` on every host.
    #[instrument(skip(self), fields(hosts = self.shells.len()))]
    pub async fn run(&self, command: &str, visibility: Visibility) -> Result<HashMap<String, String>> {
        let mut results = HashMap::with_capacity(self.shells.len());
        for shell in &self.shells {
            let output = exec_checked(shell.as_ref(), command, visibility).await?;
            results.insert(shell.host().to_string(), output);
        }
        Ok(results)
    }

    /// Run `command` with elevated privileges on every host.
    pub async fn sudo(&self, command: &str, visibility: Visibility) -> Result<HashMap<String, String>> {
        self.run(&sudo_command(command), visibility).await
    }

    /// Run on the single target and return its output.
    pub async fn run_one(&self, command: &str, visibility: Visibility) -> Result<String> {
        let results = self.run(command, visibility).await?;
        self.flatten(results)
    }

    pub async fn sudo_one(&self, command: &str, visibility: Visibility) -> Result<String> {
        let results = self.sudo(command, visibility).await?;
        self.flatten(results)
    }

    /// Download from the single target.
    pub async fn get(&self, remote_path: &str, local_dir: &Path) -> Result<Vec<PathBuf>> {
        let shell = self.target()?;
        debug!(host = %shell.host(), remote = %remote_path, "Download");
        shell.get(remote_path, local_dir).await.map_err(|e| normalize(shell.host(), e))
    }

    /// Upload to the single target.
    pub async fn put(&self, local_path: &Path, remote_path: &str) -> Result<Vec<String>> {
        let shell = self.target()?;
        debug!(host = %shell.host(), local = %local_path.display(), remote = %remote_path, "Upload");
        shell.put(local_path, remote_path).await.map_err(|e| normalize(shell.host(), e))
    }

    fn target(&self) -> Result<&Arc<dyn RemoteShell>> {
        match self.shells.as_slice() {
            [shell] => Ok(shell),
            _ => Err(BenchError::remote(
                self.hosts().join(","),
                format!("expected exactly one target host, have {}", self.shells.len()),
            )),
        }
    }

    fn flatten(&self, results: HashMap<String, String>) -> Result<String> {
        let hosts = self.hosts().join(",");
        let mut outputs = results.into_values();
        match (outputs.next(), outputs.next()) {
            (Some(output), None) => Ok(output),
            (None, _) => Err(BenchError::remote(hosts, "no result returned")),
            (Some(_), Some(_)) => Err(BenchError::remote(hosts, "more than one result returned")),
        }
    }
}

async fn exec_checked(shell: &dyn RemoteShell, command: &str, visibility: Visibility) -> Result<String> {
    let host = shell.host();
    debug!(host = %host, command = %command, "Remote execute");

    let result = shell.exec(command).await.map_err(|e| normalize(host, e));
    let out = match result {
        Ok(out) => out,
        Err(e) => {
            metrics::counter!("fuelbench_remote_commands_total", "outcome" => "aborted").increment(1);
            return Err(e);
        }
    };

    if visibility == Visibility::Verbose {
        for line in out.output.lines() {
            info!(target: crate::observability::REMOTE_OUTPUT_TARGET, host = %host, "{}", line);
        }
    }

    if out.exit_status != 0 {
        metrics::counter!("fuelbench_remote_commands_total", "outcome" => "failed").increment(1);
        info!(host = %host, command = %command, status = out.exit_status, "Remote command failed");
        let detail = out.output.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or_default();
        return Err(BenchError::remote(
            host,
            format!("'{}' exited with status {}: {}", command, out.exit_status, detail.trim()),
        ));
    }

    metrics::counter!("fuelbench_remote_commands_total", "outcome" => "ok").increment(1);
    Ok(out.output)
}

fn normalize(host: &str, err: BenchError) -> BenchError {
    match err {
        e @ BenchError::RemoteTask { .. } => e,
        other => BenchError::remote(host, other.to_string()),
    }
}

fn sudo_command(command: &str) -> String {
    format!("sudo -n sh -c {}", quote(command))
}

/// Single-quote `s` for a POSIX shell.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote a remote path, leaving a leading `~/` outside the quotes so it expands.
pub fn quote_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("~/{}", quote(rest)),
        None => quote(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeShell {
        host: String,
        status: u32,
        calls: Mutex<Vec<String>>,
    }

    impl FakeShell {
        fn new(host: &str, status: u32) -> Arc<Self> {
            Arc::new(Self { host: host.to_string(), status, calls: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl RemoteShell for FakeShell {
        fn host(&self) -> &str {
            &self.host
        }

        async fn exec(&self, command: &str) -> Result<ExecOutput> {
            self.calls.lock().unwrap().push(command.to_string());
            if command == "boom" {
                return Err(BenchError::io("/dev/null", std::io::ErrorKind::BrokenPipe.into()));
            }
            Ok(ExecOutput { output: format!("{} says hi\n", self.host), exit_status: self.status })
        }

        async fn get(&self, _remote: &str, _local: &Path) -> Result<Vec<PathBuf>> {
            Ok(vec![])
        }

        async fn put(&self, _local: &Path, remote: &str) -> Result<Vec<String>> {
            Ok(vec![remote.to_string()])
        }
    }

    #[tokio::test]
    async fn test_run_returns_host_map() {
        let a = FakeShell::new("root@a", 0);
        let b = FakeShell::new("root@b", 0);
        let channel = RemoteChannel::new(vec![a, b]);

        let results = channel.run("hostname", Visibility::Quiet).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["root@b"], "root@b says hi\n");
    }

    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_verbose_output_goes_to_remote_output_target() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || Capture(Arc::clone(&sink)))
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let channel = RemoteChannel::single(FakeShell::new("root@a", 0));
        channel.run_one("hostname", Visibility::Verbose).await.unwrap();
        channel.run_one("uptime", Visibility::Quiet).await.unwrap();

        let logged = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("fuelbench::remote_output"));
        assert_eq!(logged.matches("root@a says hi").count(), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_remote_task_error() {
        let channel = RemoteChannel::single(FakeShell::new("root@10.20.1.2", 1));
        let err = channel.run_one("grep x /y", Visibility::Quiet).await.unwrap_err();
        match err {
            BenchError::RemoteTask { host, reason } => {
                assert_eq!(host, "root@10.20.1.2");
                assert!(reason.contains("status 1"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_session_errors_are_normalized() {
        let channel = RemoteChannel::single(FakeShell::new("root@h", 0));
        let err = channel.run_one("boom", Visibility::Quiet).await.unwrap_err();
        assert!(matches!(err, BenchError::RemoteTask { .. }));
    }

    #[tokio::test]
    async fn test_flatten_rejects_multiple_hosts() {
        let channel = RemoteChannel::new(vec![FakeShell::new("a", 0), FakeShell::new("b", 0)]);
        assert!(channel.run_one("true", Visibility::Quiet).await.is_err());
        assert!(channel.put(Path::new("/tmp/x"), "~/x").await.is_err());

        let empty = RemoteChannel::new(vec![]);
        assert!(matches!(
            empty.run_one("true", Visibility::Quiet).await,
            Err(BenchError::RemoteTask { .. })
        ));
    }

    #[tokio::test]
    async fn test_sudo_wraps_command() {
        let shell = FakeShell::new("root@h", 0);
        let channel = RemoteChannel::single(shell.clone());
        channel.sudo_one("poweroff", Visibility::Quiet).await.unwrap();
        assert_eq!(shell.calls.lock().unwrap()[0], "sudo -n sh -c 'poweroff'");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote_path("~/fuelbench/a b.sh"), "~/'fuelbench/a b.sh'");
        assert_eq!(quote_path("/root/x.yaml"), "'/root/x.yaml'");
    }
}
