//! Runtime configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then the
//! command line. The resolved [`Config`] is passed explicitly to whatever
//! needs it.

use crate::streaming::channel::{DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE};
use crate::streaming::chunk::MAX_CHUNK_SIZE;
use crate::streaming::pipeline::{PipelineConfig, PROGRESS_INTERVAL};
use crate::streaming::protocol::ApplyOptions;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Size of each transfer buffer in bytes
    pub buffer_size: usize,
    /// Number of transfer buffers
    pub buffer_count: usize,
    /// Roll the destination back before receiving (`zfs recv -F`)
    pub rollback: bool,
    /// Mount the destination after receiving (no `zfs recv -u`)
    pub mount: bool,
    /// Send descendant datasets too (`zfs send -R`)
    pub recursive: bool,
    /// zsync program to run on the remote host
    pub zsync_path: String,
    /// zfs program on this host
    pub zfs_path: PathBuf,
    /// Remote shell program
    pub ssh_program: String,
    /// Show a progress spinner while sending
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
            rollback: true,
            mount: false,
            recursive: true,
            zsync_path: "zsync".to_string(),
            zfs_path: PathBuf::from("zfs"),
            ssh_program: "ssh".to_string(),
            progress: true,
        }
    }
}

impl Config {
    /// Default config file location: `<config dir>/zsync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("zsync").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists.
    /// Missing default file means built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            anyhow::bail!("buffer_size must be greater than zero");
        }
        if self.buffer_size > MAX_CHUNK_SIZE {
            anyhow::bail!(
                "buffer_size {} exceeds the maximum chunk size of {} bytes",
                self.buffer_size,
                MAX_CHUNK_SIZE
            );
        }
        if self.buffer_count == 0 {
            anyhow::bail!("buffer_count must be greater than zero");
        }
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            buffer_count: self.buffer_count,
            buffer_size: self.buffer_size,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            rollback: self.rollback,
            mount: self.mount,
            recursive: self.recursive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.buffer_size, 64 * 1024);
        assert_eq!(config.buffer_count, 1000);
        assert!(config.rollback);
        assert!(!config.mount);
        assert_eq!(config.zsync_path, "zsync");

        let opts = config.apply_options();
        assert!(opts.rollback && !opts.mount && opts.recursive);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("buffer_size = 1048576\nmount = true\n").unwrap();
        assert_eq!(config.buffer_size, 1024 * 1024);
        assert!(config.mount);
        assert_eq!(config.buffer_count, DEFAULT_BUFFER_COUNT);
        assert_eq!(config.pipeline().buffer_size, 1024 * 1024);
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        assert!(Config::from_toml("bufer_size = 10").is_err());
        assert!(Config::from_toml("buffer_count = 0").is_err());
        assert!(Config::from_toml("buffer_size = 134217728").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "zsync_path = \"/usr/local/bin/zsync\"").unwrap();
        writeln!(file, "rollback = false").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.zsync_path, "/usr/local/bin/zsync");
        assert!(!config.rollback);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/zsync.toml"))).is_err());
    }
}
