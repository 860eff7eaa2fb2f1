//! SSH-backed remote shell.
//!
//! Password authentication against the management node. The session is opened
//! lazily and reused; a failed channel drops it so the next call reconnects,
//! which is what polling loops rely on while the node is still booting.
//!
//! File transfer runs over exec channels (`cat` in both directions).

use super::{quote, quote_path, ExecOutput, RemoteShell};
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts any host key without verification.
struct AcceptAnyKey;

#[async_trait]
impl client::Handler for AcceptAnyKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

struct RawOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: u32,
}

/// Remote shell over SSH with password authentication.
pub struct SshShell {
    label: String,
    address: String,
    port: u16,
    user: String,
    password: String,
    session: Mutex<Option<Handle<AcceptAnyKey>>>,
}

impl SshShell {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let address = address.into();
        let user = user.into();
        Self {
            label: format!("{}@{}", user, address),
            address,
            port,
            user,
            password: password.into(),
            session: Mutex::new(None),
        }
    }

    fn fail(&self, reason: impl Into<String>) -> BenchError {
        BenchError::remote(self.label.clone(), reason)
    }

    async fn connect(&self) -> Result<Handle<AcceptAnyKey>> {
        debug!(host = %self.label, port = self.port, "Connecting");

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        });

        let connecting = client::connect(config, (self.address.as_str(), self.port), AcceptAnyKey);
        let mut handle = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| self.fail("connection timed out"))?
            .map_err(|e| self.fail(format!("connect failed: {}", e)))?;

        let accepted = handle
            .authenticate_password(self.user.clone(), self.password.clone())
            .await
            .map_err(|e| self.fail(format!("authentication failed: {}", e)))?;
        if !accepted {
            return Err(self.fail("authentication rejected"));
        }

        info!(host = %self.label, "SSH session established");
        Ok(handle)
    }

    /// Run one command on a fresh channel, optionally feeding `stdin`.
    async fn run_channel(&self, command: &str, stdin: Option<&[u8]>) -> Result<RawOutput> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(handle) = guard.as_ref() else {
            return Err(self.fail("no session"));
        };

        let mut channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                // stale session, reconnect on next call
                *guard = None;
                return Err(self.fail(format!("channel open failed: {}", e)));
            }
        };
        drop(guard);

        channel.exec(true, command).await.map_err(|e| self.fail(format!("exec failed: {}", e)))?;

        if let Some(bytes) = stdin {
            channel.data(bytes).await.map_err(|e| self.fail(format!("write failed: {}", e)))?;
            channel.eof().await.map_err(|e| self.fail(format!("eof failed: {}", e)))?;
        }

        let mut out = RawOutput { stdout: Vec::new(), stderr: Vec::new(), exit_status: 0 };
        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => out.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => out.stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                _ => {}
            }
        }

        out.exit_status = status.ok_or_else(|| self.fail("session closed without exit status"))?;
        Ok(out)
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn host(&self) -> &str {
        &self.label
    }

    #[instrument(skip(self), fields(host = %self.label))]
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let raw = self.run_channel(command, None).await?;
        let mut output = String::from_utf8_lossy(&raw.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&raw.stderr));
        Ok(ExecOutput { output, exit_status: raw.exit_status })
    }

    #[instrument(skip(self, local_dir), fields(host = %self.label))]
    async fn get(&self, remote_path: &str, local_dir: &Path) -> Result<Vec<PathBuf>> {
        let listing = self.run_channel(&format!("ls -1d -- {}", quote_path(remote_path)), None).await?;
        if listing.exit_status != 0 {
            return Err(self.fail(format!("{} not found", remote_path)));
        }

        tokio::fs::create_dir_all(local_dir).await.map_err(|e| BenchError::io(local_dir, e))?;

        let mut fetched = Vec::new();
        for remote in String::from_utf8_lossy(&listing.stdout).lines().filter(|l| !l.is_empty()) {
            let raw = self.run_channel(&format!("cat -- {}", quote(remote)), None).await?;
            if raw.exit_status != 0 {
                return Err(self.fail(format!("unable to read {}", remote)));
            }

            let name = Path::new(remote)
                .file_name()
                .ok_or_else(|| self.fail(format!("{} is not a file path", remote)))?;
            let local = local_dir.join(name);
            tokio::fs::write(&local, &raw.stdout).await.map_err(|e| BenchError::io(&local, e))?;
            debug!(remote = %remote, local = %local.display(), "Fetched");
            fetched.push(local);
        }
        Ok(fetched)
    }

    #[instrument(skip(self, local_path), fields(host = %self.label))]
    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(local_path).await.map_err(|e| BenchError::io(local_path, e))?;
        let raw = self
            .run_channel(&format!("cat > {}", quote_path(remote_path)), Some(&bytes))
            .await?;
        if raw.exit_status != 0 {
            return Err(self.fail(format!(
                "unable to write {}: {}",
                remote_path,
                String::from_utf8_lossy(&raw.stderr).trim()
            )));
        }
        Ok(vec![remote_path.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label() {
        let shell = SshShell::new("10.20.3.2", 22, "root", "r00tme");
        assert_eq!(shell.host(), "root@10.20.3.2");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_remote_task_error() {
        // nothing listens on port 1 of the loopback
        let shell = SshShell::new("127.0.0.1", 1, "root", "r00tme");
        let err = shell.exec("true").await.unwrap_err();
        assert!(matches!(err, BenchError::RemoteTask { ref host, .. } if host == "root@127.0.0.1"));
    }
}
