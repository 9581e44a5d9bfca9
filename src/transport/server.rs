//! Server session - establishes connection to remote `zsync --server`
//!
//! Provides raw stdin/stdout streams. Protocol handling is done by the sender.

use crate::process::{forward_lines, ChildProcess};
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Manages connection to a remote zsync --server instance
pub struct ServerSession {
    process: ChildProcess,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ServerSession {
    /// Connect to remote server via the remote shell
    pub async fn connect_ssh(ssh: &str, host: &str, zsync_path: &str) -> Result<Self> {
        debug!("exec: {} {} {} --server", ssh, host, zsync_path);

        let mut cmd = Command::new(ssh);
        cmd.arg(host);
        cmd.arg(zsync_path);
        cmd.arg("--server");

        Self::spawn(cmd, ssh)
    }

    /// Connect to local server (for testing)
    pub async fn connect_local(exe: &Path) -> Result<Self> {
        debug!("exec: {} --server", exe.display());

        let mut cmd = Command::new(exe);
        cmd.arg("--server");

        Self::spawn(cmd, "zsync --server")
    }

    fn spawn(mut cmd: Command, name: &str) -> Result<Self> {
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", name))?;

        let stdin = child.stdin.take().context("Failed to open stdin")?;
        let stdout = child.stdout.take().context("Failed to open stdout")?;
        if let Some(stderr) = child.stderr.take() {
            forward_lines("remote", stderr);
        }

        Ok(Self {
            process: ChildProcess::new(name, child),
            stdin,
            stdout,
        })
    }

    /// Split into stdin/stdout for protocol handling, plus the process to
    /// wait on once stdin has been closed.
    pub fn split(self) -> (ChildStdin, ChildStdout, ChildProcess) {
        (self.stdin, self.stdout, self.process)
    }
}
