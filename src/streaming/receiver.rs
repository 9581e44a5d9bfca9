//! Receiving side of a replication run.
//!
//! Answers control commands until the peer hangs up. A Receive command is
//! followed directly by a chunk stream, which is copied into the apply
//! process.

use crate::error::ReplicationError;
use crate::store::SnapshotStore;
use crate::streaming::pipeline::{ChunkSource, RawSink, StreamingPipeline};
use crate::streaming::progress::LogReporter;
use crate::streaming::protocol::{
    negotiate_version, read_command, write_command, Command, CommandKind, ReceiveRequest,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Receiver statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Snapshot lists served
    pub lists: u64,
    /// Streams applied
    pub receives: u64,
    /// Stream bytes written to apply processes
    pub bytes_received: u64,
}

pub struct Receiver {
    store: Arc<dyn SnapshotStore>,
    pipeline: StreamingPipeline,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new(store: Arc<dyn SnapshotStore>, pipeline: StreamingPipeline) -> Self {
        Self {
            store,
            pipeline,
            stats: ReceiverStats::default(),
        }
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Serve one connection. Returns when the peer closes it.
    pub async fn run<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<ReceiverStats>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        negotiate_version(&mut reader, &mut writer).await?;
        debug!("server: starting up");

        while let Some(cmd) = read_command(&mut reader).await? {
            match cmd.kind {
                CommandKind::ListSnapshots => {
                    self.handle_list(&cmd, &mut writer).await?;
                }
                CommandKind::Receive => {
                    let request = ReceiveRequest::from_command(&cmd)?;
                    reader = self.handle_receive(&request, reader).await?;

                    write_command(&mut writer, &Command::result()).await?;
                    writer.flush().await?;
                }
                kind => {
                    return Err(ReplicationError::UnexpectedCommand {
                        got: kind,
                        context: "in server command loop",
                    }
                    .into());
                }
            }
        }

        debug!("server: peer closed connection");
        Ok(self.stats.clone())
    }

    async fn handle_list<W>(&mut self, cmd: &Command, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let dataset = cmd.first_param()?;
        debug!("server: listing snapshots of {}", dataset);

        // A destination that does not exist yet has no snapshots.
        let entries = match self.store.list_snapshots(dataset).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("listing snapshots of {} failed: {:#}", dataset, e);
                Vec::new()
            }
        };

        write_command(writer, &Command::snapshot_list(&entries)?).await?;
        writer.flush().await?;
        self.stats.lists += 1;
        Ok(())
    }

    /// Apply one chunk stream. Hands the transport reader back once the
    /// end-of-stream marker has been read.
    async fn handle_receive<R>(&mut self, request: &ReceiveRequest, reader: R) -> Result<R>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        debug!("server: receiving into {} ({:?})", request.target, request.options);

        let apply = self
            .store
            .receive(request)
            .await
            .with_context(|| format!("Failed to start receiving into {}", request.target))?;
        let mut process = apply.process;
        let mut sink = RawSink::new(apply.input);

        let (source, stats) = self
            .pipeline
            .run(ChunkSource::new(reader), &mut sink, &mut LogReporter::new("receiving"))
            .await
            .context("Failed to receive snapshot stream")?;

        // Closing the input lets the apply process finish.
        drop(sink);
        process.wait().await?;

        info!("received {} bytes into {}", stats.bytes, request.target);
        self.stats.receives += 1;
        self.stats.bytes_received += stats.bytes;
        Ok(source.into_inner())
    }
}
