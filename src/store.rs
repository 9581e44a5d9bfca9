//! Boundary to the storage system.
//!
//! The replication core only needs three things from storage: an ordered
//! snapshot history, a process producing a delta stream, and a process
//! applying one. [`crate::zfs::ZfsStore`] is the real implementation.

use crate::snapshot::SnapshotEntry;
use crate::streaming::protocol::ReceiveRequest;
use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Something that finishes with a success or failure status.
#[async_trait]
pub trait Completion: Send {
    /// Wait for completion. A non-zero exit is an error.
    async fn wait(&mut self) -> Result<()>;
}

/// Snapshot range to produce a delta stream for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRange {
    /// Snapshot the stream ends at.
    pub target: SnapshotEntry,
    /// Snapshot name to start from; `None` for a full stream.
    pub from: Option<String>,
    /// Include descendant datasets.
    pub recursive: bool,
}

/// Running delta producer.
pub struct DeltaStream {
    pub output: ByteSource,
    pub process: Box<dyn Completion>,
}

/// Running delta consumer.
pub struct ApplySink {
    pub input: ByteSink,
    pub process: Box<dyn Completion>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Snapshots of `dataset`, oldest first.
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<SnapshotEntry>>;

    /// Start producing the delta stream for `range`.
    async fn send(&self, range: &SendRange) -> Result<DeltaStream>;

    /// Start applying a delta stream as described by `request`.
    async fn receive(&self, request: &ReceiveRequest) -> Result<ApplySink>;
}
