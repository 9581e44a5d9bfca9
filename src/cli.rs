use crate::config::Config;
use crate::sync::{Destination, SourceSpec};
use clap::Parser;
use std::path::PathBuf;

/// Exit code for a usage error.
pub const EXIT_USAGE: u8 = 2;
/// Exit code for a failed replication.
pub const EXIT_FAILURE: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "zsync")]
#[command(about = "Incremental ZFS snapshot replication over ssh", long_about = None)]
#[command(version)]
#[command(after_help = "Example:\n  zsync tank/data root@172.16.32.12:tank/replicated")]
pub struct Cli {
    /// Source dataset, optionally pinned to a snapshot
    #[arg(value_name = "SRCDS[@SNAPSHOT]", required_unless_present = "server")]
    pub source: Option<SourceSpec>,

    /// Destination host and dataset (defaults to the source dataset name)
    #[arg(value_name = "HOST[:DSTDS]", required_unless_present = "server")]
    pub destination: Option<Destination>,

    /// Increase the output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Mount the destination dataset after replication (i.e. do not do zfs recv -u)
    #[arg(long)]
    pub mount_destination: bool,

    /// Do not roll back the destination dataset prior to replication (i.e. do not do zfs recv -F)
    #[arg(long)]
    pub no_rollback: bool,

    /// Send only the dataset itself, not its descendants (i.e. do not do zfs send -R)
    #[arg(long)]
    pub no_recursive: bool,

    /// zsync program to run on the remote machine
    #[arg(long, value_name = "PROGRAM", env = "ZSYNC_PATH")]
    pub zsync_path: Option<String>,

    /// zfs program on this machine
    #[arg(long, value_name = "PROGRAM")]
    pub zfs_path: Option<PathBuf>,

    /// Remote shell program
    #[arg(long, value_name = "PROGRAM", env = "ZSYNC_SSH")]
    pub ssh: Option<String>,

    /// Transfer buffer size (e.g. 64K, 1M)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub buffer_size: Option<usize>,

    /// Number of transfer buffers
    #[arg(long, value_name = "COUNT", value_parser = clap::value_parser!(u32).range(1..))]
    pub buffers: Option<u32>,

    /// Do not show transfer progress
    #[arg(long)]
    pub no_progress: bool,

    /// Configuration file (default: <config dir>/zsync/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as the receiving end on stdin/stdout [internal]
    #[arg(long, hide = true)]
    pub server: bool,
}

impl Cli {
    /// Tracing filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Apply command line overrides on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        if self.mount_destination {
            config.mount = true;
        }
        if self.no_rollback {
            config.rollback = false;
        }
        if self.no_recursive {
            config.recursive = false;
        }
        if self.no_progress {
            config.progress = false;
        }
        if let Some(path) = &self.zsync_path {
            config.zsync_path = path.clone();
        }
        if let Some(path) = &self.zfs_path {
            config.zfs_path = path.clone();
        }
        if let Some(ssh) = &self.ssh {
            config.ssh_program = ssh.clone();
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if let Some(count) = self.buffers {
            config.buffer_count = count as usize;
        }
    }
}

/// Parse a byte size with an optional K/M/G suffix (powers of 1024).
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let multiplier = match c.to_ascii_uppercase() {
                'K' => 1024,
                'M' => 1024 * 1024,
                'G' => 1024 * 1024 * 1024,
                _ => return Err(format!("unknown size suffix {:?}", c)),
            };
            (&s[..i], multiplier)
        }
        _ => (s, 1),
    };

    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size {:?}", s))?;
    let size = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size {:?} is too large", s))?;
    if size == 0 {
        return Err("size must be greater than zero".to_string());
    }
    if size > crate::streaming::MAX_CHUNK_SIZE {
        return Err(format!(
            "size {:?} exceeds the maximum chunk size of {} bytes",
            s,
            crate::streaming::MAX_CHUNK_SIZE
        ));
    }
    Ok(size)
}
