//! Sending side of a replication run.
//!
//! Lists both histories, reconciles them, starts the delta producer and
//! streams its output to the receiver as chunks.

use crate::snapshot::{plan, SendPlan, SnapshotEntry};
use crate::store::{SendRange, SnapshotStore};
use crate::streaming::pipeline::{ChunkSink, RawSource, StreamingPipeline};
use crate::streaming::progress::{ProgressReporter, TransferStats};
use crate::streaming::protocol::{ApplyOptions, ControlChannel, ReceiveRequest};
use anyhow::{Context, Result};
use indicatif::HumanBytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Sender configuration
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Local dataset to replicate
    pub dataset: String,
    /// Send this snapshot instead of the newest one
    pub pinned: Option<String>,
    /// Dataset to receive into on the remote side
    pub target: String,
    /// Options for the remote apply step
    pub apply: ApplyOptions,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Destination already had the snapshot. Nothing was sent.
    InSync { snapshot: SnapshotEntry },
    Sent {
        snapshot: SnapshotEntry,
        base: Option<SnapshotEntry>,
        stats: TransferStats,
    },
}

pub struct Sender {
    store: Arc<dyn SnapshotStore>,
    pipeline: StreamingPipeline,
    config: SenderConfig,
}

impl Sender {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        pipeline: StreamingPipeline,
        config: SenderConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            config,
        }
    }

    /// Work out what to send. Talks to both sides but starts nothing.
    pub async fn plan<R, W>(&self, control: &mut ControlChannel<R, W>) -> Result<SendPlan>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let remote = control
            .list_snapshots(&self.config.target)
            .await
            .context("Failed to list remote snapshots")?;
        let local = self
            .store
            .list_snapshots(&self.config.dataset)
            .await
            .context("Failed to list local snapshots")?;
        debug!(
            "{} local and {} remote snapshots",
            local.len(),
            remote.len()
        );

        let plan = plan(
            &self.config.dataset,
            &local,
            &remote,
            self.config.pinned.as_deref(),
        )?;
        debug!("our latest: {}", plan.target);
        if let Some(base) = &plan.base {
            debug!("remote latest: {}", base);
        }
        Ok(plan)
    }

    /// Replicate over an already negotiated control channel.
    pub async fn run<R, W>(
        &self,
        control: &mut ControlChannel<R, W>,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<Outcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        let plan = self.plan(control).await?;
        if plan.is_noop() {
            info!("nothing to send (destination in sync)");
            return Ok(Outcome::InSync {
                snapshot: plan.target,
            });
        }

        let range = SendRange {
            target: plan.target.clone(),
            from: plan.base.as_ref().map(|b| b.snapshot.clone()),
            recursive: self.config.apply.recursive,
        };
        let mut delta = self
            .store
            .send(&range)
            .await
            .with_context(|| format!("Failed to start sending {}", plan.target))?;

        let request = ReceiveRequest::new(self.config.target.clone(), self.config.apply);
        control.request_receive(&request).await?;

        match &plan.base {
            Some(base) => debug!("sending {}..{}", base.snapshot, plan.target.snapshot),
            None => debug!("sending full stream of {}", plan.target),
        }

        let mut sink = ChunkSink::new(control.writer_mut());
        let (_, stats) = self
            .pipeline
            .run(RawSource::new(delta.output), &mut sink, reporter)
            .await
            .context("Failed to stream snapshot")?;

        delta.process.wait().await?;
        control
            .await_result()
            .await
            .context("Remote failed to apply the stream")?;

        info!(
            "sent {}; {} in {:.2} seconds ({}/s)",
            plan.target,
            HumanBytes(stats.bytes),
            stats.elapsed.as_secs_f64(),
            HumanBytes(stats.rate() as u64)
        );

        Ok(Outcome::Sent {
            snapshot: plan.target,
            base: plan.base,
            stats,
        })
    }
}
