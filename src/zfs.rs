//! `zfs` command line implementation of [`SnapshotStore`].

use crate::process::{forward_lines, ChildProcess};
use crate::snapshot::SnapshotEntry;
use crate::store::{ApplySink, DeltaStream, SendRange, SnapshotStore};
use crate::streaming::protocol::{ApplyOptions, ReceiveRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub struct ZfsStore {
    program: PathBuf,
}

impl ZfsStore {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.kill_on_drop(true);
        cmd
    }
}

impl Default for ZfsStore {
    fn default() -> Self {
        Self::new("zfs")
    }
}

/// `zfs list` arguments for the direct snapshots of `dataset`, oldest first.
pub fn list_args(dataset: &str) -> Vec<String> {
    [
        "list", "-H", "-o", "name", "-t", "snapshot", "-s", "createtxg", "-d", "1", dataset,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn send_args(range: &SendRange) -> Vec<String> {
    let mut args = vec!["send".to_string()];
    if range.recursive {
        args.push("-R".to_string());
    }
    if let Some(from) = &range.from {
        args.push("-I".to_string());
        args.push(format!("@{}", from));
    }
    args.push(range.target.to_string());
    args
}

/// The stream itself says whether it is recursive, so only rollback and
/// mount map to `zfs recv` flags.
pub fn receive_args(target: &str, options: &ApplyOptions) -> Vec<String> {
    let mut args = vec!["recv".to_string()];
    if options.rollback {
        args.push("-F".to_string());
    }
    if !options.mount {
        args.push("-u".to_string());
    }
    args.push(target.to_string());
    args
}

/// Parse `zfs list -H -o name` output.
pub fn parse_snapshot_list(output: &str) -> Vec<SnapshotEntry> {
    output
        .lines()
        .map(str::trim)
        .filter_map(SnapshotEntry::parse)
        .collect()
}

#[async_trait]
impl SnapshotStore for ZfsStore {
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<SnapshotEntry>> {
        let args = list_args(dataset);
        debug!("exec: zfs {}", args.join(" "));

        let output = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .context("Failed to run zfs list")?;
        if !output.status.success() {
            anyhow::bail!(
                "zfs list {} failed: {}",
                dataset,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Invalid UTF-8 from zfs list")?;
        Ok(parse_snapshot_list(&stdout))
    }

    async fn send(&self, range: &SendRange) -> Result<DeltaStream> {
        let args = send_args(range);
        debug!("exec: zfs {}", args.join(" "));

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn zfs send")?;

        let stdout = child.stdout.take().context("Failed to open zfs send stdout")?;
        if let Some(stderr) = child.stderr.take() {
            forward_lines("zfs send", stderr);
        }

        Ok(DeltaStream {
            output: Box::new(stdout),
            process: Box::new(ChildProcess::new("zfs send", child)),
        })
    }

    async fn receive(&self, request: &ReceiveRequest) -> Result<ApplySink> {
        let args = receive_args(&request.target, &request.options);
        debug!("exec: zfs {}", args.join(" "));

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn zfs recv")?;

        let stdin = child.stdin.take().context("Failed to open zfs recv stdin")?;
        if let Some(stdout) = child.stdout.take() {
            forward_lines("zfs recv", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines("zfs recv", stderr);
        }

        Ok(ApplySink {
            input: Box::new(stdin),
            process: Box::new(ChildProcess::new("zfs recv", child)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_list() {
        let out = "tank/data@a\ntank/data@b\n\nnot-a-snapshot\ntank/data@c\n";
        let entries = parse_snapshot_list(out);
        let names: Vec<_> = entries.iter().map(|e| e.snapshot.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(entries.iter().all(|e| e.dataset == "tank/data"));
    }

    #[test]
    fn test_send_args_full() {
        let range = SendRange {
            target: SnapshotEntry::new("tank/data", "c"),
            from: None,
            recursive: true,
        };
        assert_eq!(send_args(&range), vec!["send", "-R", "tank/data@c"]);
    }

    #[test]
    fn test_send_args_incremental() {
        let range = SendRange {
            target: SnapshotEntry::new("tank/data", "c"),
            from: Some("b".to_string()),
            recursive: false,
        };
        assert_eq!(send_args(&range), vec!["send", "-I", "@b", "tank/data@c"]);
    }

    #[test]
    fn test_receive_args() {
        let opts = ApplyOptions {
            rollback: true,
            mount: false,
            recursive: true,
        };
        assert_eq!(receive_args("backup/data", &opts), vec!["recv", "-F", "-u", "backup/data"]);

        let opts = ApplyOptions {
            rollback: false,
            mount: true,
            recursive: false,
        };
        assert_eq!(receive_args("backup/data", &opts), vec!["recv", "backup/data"]);
    }

    #[test]
    fn test_list_args() {
        let args = list_args("tank/data");
        assert_eq!(args.first().map(String::as_str), Some("list"));
        assert_eq!(args.last().map(String::as_str), Some("tank/data"));
        assert!(args.iter().any(|a| a == "createtxg"));
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let store = ZfsStore::new("/nonexistent/zfs-binary");
        assert!(store.list_snapshots("tank").await.is_err());
    }
}
