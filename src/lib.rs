//! zsync - incremental ZFS snapshot replication over ssh.
//!
//! The sender lists snapshot history on both ends, picks the newest common
//! snapshot and streams the delta to a `zsync --server` on the remote host,
//! which feeds it to `zfs recv`.

pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod streaming;
pub mod sync;
pub mod transport;
pub mod zfs;

pub use config::Config;
pub use error::ReplicationError;
pub use snapshot::{latest_common, SnapshotEntry};
