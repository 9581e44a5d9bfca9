//! Client mode - replicate a local dataset to a remote host.

use crate::config::Config;
use crate::store::Completion;
use crate::streaming::{
    BarReporter, ControlChannel, NullReporter, Outcome, ProgressReporter, Sender, SenderConfig,
    StreamingPipeline,
};
use crate::transport::ServerSession;
use crate::zfs::ZfsStore;
use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// `<dataset>[@snapshot]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub dataset: String,
    pub snapshot: Option<String>,
}

impl FromStr for SourceSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (dataset, snapshot) = match s.split_once('@') {
            Some((_, "")) => return Err(format!("empty snapshot name in {:?}", s)),
            Some((dataset, snapshot)) => (dataset, Some(snapshot.to_string())),
            None => (s, None),
        };
        if dataset.is_empty() {
            return Err(format!("empty dataset name in {:?}", s));
        }
        Ok(Self {
            dataset: dataset.to_string(),
            snapshot,
        })
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.snapshot {
            Some(snapshot) => write!(f, "{}@{}", self.dataset, snapshot),
            None => write!(f, "{}", self.dataset),
        }
    }
}

/// `[user@]host[:dataset]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub dataset: Option<String>,
}

impl Destination {
    /// Remote dataset; defaults to the source dataset name.
    pub fn dataset_or<'a>(&'a self, source: &'a str) -> &'a str {
        self.dataset.as_deref().unwrap_or(source)
    }
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, dataset) = match s.split_once(':') {
            Some((host, "")) => (host, None),
            Some((host, dataset)) => (host, Some(dataset.to_string())),
            None => (s, None),
        };
        if host.is_empty() {
            return Err(format!("empty host in {:?}", s));
        }
        Ok(Self {
            host: host.to_string(),
            dataset,
        })
    }
}

/// Replicate `source` to `destination` through `zsync --server` over ssh.
pub async fn replicate(
    config: &Config,
    source: &SourceSpec,
    destination: &Destination,
) -> Result<Outcome> {
    let target = destination.dataset_or(&source.dataset).to_string();

    let session =
        ServerSession::connect_ssh(&config.ssh_program, &destination.host, &config.zsync_path)
            .await?;
    let (stdin, stdout, mut remote) = session.split();

    let mut control = ControlChannel::new(stdout, stdin);
    control.negotiate().await?;

    let sender = Sender::new(
        Arc::new(ZfsStore::new(&config.zfs_path)),
        StreamingPipeline::new(config.pipeline()),
        SenderConfig {
            dataset: source.dataset.clone(),
            pinned: source.snapshot.clone(),
            target,
            apply: config.apply_options(),
        },
    );

    let mut reporter: Box<dyn ProgressReporter> = if config.progress {
        Box::new(BarReporter::new("sending"))
    } else {
        Box::new(NullReporter)
    };
    let outcome = sender.run(&mut control, reporter.as_mut()).await?;

    // Closing stdin ends the server's command loop.
    drop(control);
    remote
        .wait()
        .await
        .with_context(|| format!("Remote session to {} failed", destination.host))?;

    Ok(outcome)
}
