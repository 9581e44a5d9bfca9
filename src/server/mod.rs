//! Server mode - runs when invoked as `zsync --server`
//!
//! Stdin and stdout are the transport. Nothing else may write to stdout.

use crate::config::Config;
use crate::streaming::{Receiver, ReceiverStats, StreamingPipeline};
use crate::zfs::ZfsStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{self, BufReader};

/// Main server entry point
pub async fn run_server(config: &Config) -> Result<ReceiverStats> {
    let stdin = BufReader::new(io::stdin());
    let stdout = io::stdout();

    let store = Arc::new(ZfsStore::new(&config.zfs_path));
    let mut receiver = Receiver::new(store, StreamingPipeline::new(config.pipeline()));
    receiver.run(stdin, stdout).await
}
