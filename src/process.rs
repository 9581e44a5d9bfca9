//! Child process helpers.

use crate::error::ReplicationError;
use crate::store::Completion;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::info;

/// A spawned child whose exit status decides success.
pub struct ChildProcess {
    program: String,
    child: Child,
}

impl ChildProcess {
    pub fn new(program: impl Into<String>, child: Child) -> Self {
        Self {
            program: program.into(),
            child,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Completion for ChildProcess {
    async fn wait(&mut self) -> Result<()> {
        let status = self
            .child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for {}", self.program))?;
        if !status.success() {
            return Err(ReplicationError::ProcessFailed {
                program: self.program.clone(),
                status,
            }
            .into());
        }
        Ok(())
    }
}

/// Forward each line of `reader` to the log, prefixed.
///
/// Stops at EOF or on the first read error.
pub fn forward_lines<R>(prefix: impl Into<String>, reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let prefix = prefix.into();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("{}: {}", prefix, line);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_forward_lines_reads_to_eof() {
        let input: &[u8] = b"one\ntwo\nthree";
        forward_lines("test", input).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exit_status() {
        let child = Command::new("true").stdin(Stdio::null()).spawn().unwrap();
        ChildProcess::new("true", child).wait().await.unwrap();

        let child = Command::new("false").stdin(Stdio::null()).spawn().unwrap();
        let err = ChildProcess::new("false", child).wait().await.unwrap_err();
        match err.downcast_ref::<ReplicationError>() {
            Some(ReplicationError::ProcessFailed { program, status }) => {
                assert_eq!(program, "false");
                assert!(!status.success());
            }
            other => panic!("Expected ProcessFailed, got {:?}", other),
        }
    }
}
