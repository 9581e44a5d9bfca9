//! Error taxonomy for replication runs.
//!
//! Every variant is fatal. Functions return `anyhow::Result` and use these
//! values as the root cause so callers can tell protocol, transport and
//! subprocess failures apart with `downcast_ref`.

use crate::streaming::protocol::CommandKind;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicationError {
    // Protocol
    #[error("mismatched protocol version {remote} != {local}")]
    VersionMismatch { local: String, remote: String },

    #[error("unexpected {got:?} command {context}")]
    UnexpectedCommand {
        got: CommandKind,
        context: &'static str,
    },

    #[error("unknown command kind {0}")]
    UnknownCommand(u32),

    #[error("malformed {kind:?} command: {reason}")]
    MalformedCommand { kind: CommandKind, reason: String },

    #[error("truncated stream: expected {expected} bytes, got {got}")]
    TruncatedStream { expected: usize, got: usize },

    #[error("{what} of {size} bytes exceeds maximum allowed size {limit}")]
    TooLarge {
        what: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("refusing to write an empty chunk (reserved for end of stream)")]
    EmptyChunk,

    #[error("peer closed the connection {0}")]
    PeerClosed(&'static str),

    // Subprocess
    #[error("{program} exited with {status}")]
    ProcessFailed { program: String, status: ExitStatus },

    // Snapshot selection
    #[error("no snapshots found for dataset {0}")]
    NoSnapshots(String),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),
}

impl ReplicationError {
    pub fn malformed(kind: CommandKind, reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            kind,
            reason: reason.into(),
        }
    }
}
