//! Bounded two-stage copy pipeline.
//!
//! ```text
//!              free queue (N buffers of S bytes)
//!        +--------------------------------------------+
//!        v                                            |
//! +--------------+   ready queue (cap N)   +--------------+
//! | reader stage | ----------------------> | writer stage |
//! |   (source)   |  Slot::Filled / End     |    (sink)    |
//! +--------------+                         +--------------+
//! ```
//!
//! The reader runs as a spawned task and the writer on the calling task, so
//! on the multi-thread runtime the two run in parallel. Taking a free buffer
//! is the only back-pressure point: memory stays at N x S no matter how fast
//! the source is.

use crate::error::ReplicationError;
use crate::streaming::channel::{
    ready_channel, BufferPool, FreeReceiver, FreeSender, InFlight, ReadyReceiver, ReadySender,
    Slot, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE,
};
use crate::streaming::chunk::{close_stream, read_chunk_len, read_full, write_chunk};
use crate::streaming::progress::{Progress, ProgressReporter, TransferStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Default interval between progress observations
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// The other stage went away before the end of the stream.
#[derive(Debug, thiserror::Error)]
#[error("pipeline {0} stopped early")]
struct StageStopped(&'static str);

// =============================================================================
// Sources and sinks
// =============================================================================

/// Whether a source has more data after this fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    More,
    Last,
}

/// Where the reader stage gets bytes from.
#[async_trait]
pub trait BufferSource: Send {
    /// Fill `buf` (empty on entry, capacity at least `size`). The buffer may
    /// be left empty only together with [`Fill::Last`].
    async fn fill(&mut self, buf: &mut Vec<u8>, size: usize) -> Result<Fill>;
}

/// Where the writer stage puts bytes.
#[async_trait]
pub trait BufferSink: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Called once after the last buffer.
    async fn finish(&mut self) -> Result<()>;
}

/// Raw byte stream, read in full buffers.
#[derive(Debug)]
pub struct RawSource<R> {
    reader: R,
}

impl<R> RawSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> BufferSource for RawSource<R> {
    async fn fill(&mut self, buf: &mut Vec<u8>, size: usize) -> Result<Fill> {
        buf.resize(size, 0);
        let n = read_full(&mut self.reader, buf)
            .await
            .context("Failed to read source stream")?;
        buf.truncate(n);
        Ok(if n < size { Fill::Last } else { Fill::More })
    }
}

/// Chunk stream, read until the end-of-stream marker.
///
/// Buffers are filled from the body of the current chunk, at most `size`
/// bytes at a time, so the peer's chunk size never decides how large a
/// buffer gets. Chunk boundaries are not preserved.
#[derive(Debug)]
pub struct ChunkSource<R> {
    reader: R,
    /// Unread bytes of the current chunk.
    remaining: usize,
}

impl<R> ChunkSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            remaining: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> BufferSource for ChunkSource<R> {
    async fn fill(&mut self, buf: &mut Vec<u8>, size: usize) -> Result<Fill> {
        if self.remaining == 0 {
            match read_chunk_len(&mut self.reader).await? {
                Some(len) => self.remaining = len,
                None => return Ok(Fill::Last),
            }
        }

        let want = self.remaining.min(size);
        buf.resize(want, 0);
        let got = read_full(&mut self.reader, buf)
            .await
            .context("Failed to read chunk")?;
        if got < want {
            return Err(ReplicationError::TruncatedStream {
                expected: self.remaining,
                got,
            }
            .into());
        }
        self.remaining -= want;
        Ok(Fill::More)
    }
}

/// Frames each buffer as a chunk and ends with the end-of-stream marker.
pub struct ChunkSink<'a, W> {
    writer: &'a mut W,
}

impl<'a, W> ChunkSink<'a, W> {
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<'a, W: AsyncWrite + Unpin + Send> BufferSink for ChunkSink<'a, W> {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        write_chunk(&mut *self.writer, buf).await
    }

    async fn finish(&mut self) -> Result<()> {
        close_stream(&mut *self.writer).await?;
        self.writer
            .flush()
            .await
            .context("Failed to flush chunk stream")?;
        Ok(())
    }
}

/// Writes buffers as-is and shuts the writer down at the end.
pub struct RawSink<W> {
    writer: W,
}

impl<W> RawSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> BufferSink for RawSink<W> {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.writer
            .write_all(buf)
            .await
            .with_context(|| format!("Failed to write {} bytes to sink", buf.len()))
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await.context("Failed to flush sink")?;
        self.writer
            .shutdown()
            .await
            .context("Failed to close sink")?;
        Ok(())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of buffers in the pool
    pub buffer_count: usize,
    /// Size of each buffer in bytes
    pub buffer_size: usize,
    /// Minimum time between progress observations
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

pub struct StreamingPipeline {
    config: PipelineConfig,
}

impl StreamingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Copy everything from `source` to `sink`.
    ///
    /// Returns only after both stages have stopped. The source is handed back
    /// so the caller can keep reading from the underlying transport.
    pub async fn run<S, K>(
        &self,
        source: S,
        sink: &mut K,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<(S, TransferStats)>
    where
        S: BufferSource + 'static,
        K: BufferSink + ?Sized,
    {
        let (pool, free_tx, free_rx) =
            BufferPool::new(self.config.buffer_count, self.config.buffer_size);
        let (ready_tx, ready_rx) = ready_channel(pool.count());
        let size = pool.buffer_size();
        debug!(
            "pipeline: {} buffers of {} bytes",
            pool.allocated(),
            pool.buffer_size()
        );

        let start = Instant::now();
        let reader = tokio::spawn(read_stage(source, size, free_rx, ready_tx, pool.tracker()));

        let written = write_stage(
            sink,
            ready_rx,
            free_tx,
            pool.tracker(),
            reporter,
            start,
            self.config.progress_interval,
        )
        .await;

        // The writer has dropped its queue ends, so a blocked reader wakes up.
        let read = reader.await.context("Pipeline reader task panicked")?;

        // Report the stage that failed first, not the one left waiting on it.
        let (source, bytes) = match (read, written) {
            (Ok(source), Ok(bytes)) => (source, bytes),
            (Err(e), Err(w)) if w.is::<StageStopped>() => return Err(e),
            (_, Err(w)) => return Err(w),
            (Err(e), Ok(_)) => return Err(e),
        };

        let stats = TransferStats {
            bytes,
            elapsed: start.elapsed(),
            buffers_allocated: pool.allocated(),
            peak_in_flight: pool.peak_in_flight(),
            largest_buffer: pool.largest_buffer(),
        };
        reporter.finish(&stats);
        Ok((source, stats))
    }
}

async fn read_stage<S: BufferSource>(
    mut source: S,
    size: usize,
    mut free: FreeReceiver,
    ready: ReadySender,
    in_flight: InFlight,
) -> Result<S> {
    let closed = || anyhow::Error::new(StageStopped("writer"));

    loop {
        let mut buf = free.recv().await.ok_or_else(closed)?;
        in_flight.taken();
        buf.clear();

        let capacity = buf.capacity();
        let fill = source.fill(&mut buf, size).await?;
        in_flight.filled(capacity, buf.capacity());
        trace!("reader: filled {} bytes", buf.len());

        if buf.is_empty() {
            in_flight.returned();
        } else {
            ready.send(Slot::Filled(buf)).await.map_err(|_| closed())?;
        }

        if fill == Fill::Last {
            ready.send(Slot::End).await.map_err(|_| closed())?;
            return Ok(source);
        }
    }
}

async fn write_stage<K: BufferSink + ?Sized>(
    sink: &mut K,
    mut ready: ReadyReceiver,
    free: FreeSender,
    in_flight: InFlight,
    reporter: &mut dyn ProgressReporter,
    start: Instant,
    interval: Duration,
) -> Result<u64> {
    let mut total = 0u64;
    let mut last_report = start;
    let mut last_total = 0u64;

    loop {
        let slot = ready
            .recv()
            .await
            .ok_or(StageStopped("reader"))?;

        let buf = match slot {
            Slot::End => {
                sink.finish().await?;
                return Ok(total);
            }
            Slot::Filled(buf) => buf,
        };

        if buf.is_empty() {
            return Err(ReplicationError::EmptyChunk.into());
        }
        sink.write(&buf).await?;
        total += buf.len() as u64;

        in_flight.returned();
        // The reader may already be done; a closed free queue is fine then.
        let _ = free.send(buf).await;

        let now = Instant::now();
        let since = now.duration_since(last_report);
        if since >= interval {
            let secs = since.as_secs_f64();
            let rate = if secs > 0.0 {
                (total - last_total) as f64 / secs
            } else {
                0.0
            };
            reporter.update(&Progress {
                total_bytes: total,
                rate,
                elapsed: now.duration_since(start),
            });
            last_report = now;
            last_total = total;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
