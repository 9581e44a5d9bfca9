//! Replication transport for zsync.
//!
//! One duplex byte stream carries both the control protocol and the bulk
//! snapshot stream. They are never interleaved; the protocol sequence decides
//! what comes next.
//!
//! # Architecture
//!
//! ```text
//! sender                                         receiver
//! ------                                         --------
//! Version            ------------------------>   Version
//! ListSnapshots      ------------------------>   store.list_snapshots
//!                    <------------------------   snapshot list
//! latest_common, zfs send
//! Receive            ------------------------>   zfs recv
//! chunk, chunk, ...  ------------------------>   pipeline -> recv stdin
//! end-of-stream (0)  ------------------------>   close stdin, wait
//!                    <------------------------   Result
//! ```
//!
//! The chunk stream on each side runs through a [`StreamingPipeline`]: a
//! reader task and a writer task joined by bounded buffer queues.

pub mod channel;
pub mod chunk;
pub mod pipeline;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use channel::{BufferPool, Slot, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE};
pub use chunk::{close_stream, read_chunk, read_chunk_len, write_chunk, MAX_CHUNK_SIZE};
pub use pipeline::{
    BufferSink, BufferSource, ChunkSink, ChunkSource, Fill, PipelineConfig, RawSink, RawSource,
    StreamingPipeline, PROGRESS_INTERVAL,
};
pub use progress::{
    BarReporter, LogReporter, NullReporter, Progress, ProgressReporter, TransferStats,
};
pub use protocol::{
    negotiate_version, read_command, write_command, ApplyOptions, Command, CommandKind,
    ControlChannel, ReceiveRequest, PROTOCOL_VERSION,
};
pub use receiver::{Receiver, ReceiverStats};
pub use sender::{Outcome, Sender, SenderConfig};
