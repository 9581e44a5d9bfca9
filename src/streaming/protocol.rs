//! Control protocol messages.
//!
//! Strictly sequential request/response over the same transport as the chunk
//! stream. One message is fully written (and flushed) before the next is read.
//!
//! Wire format: all multi-byte integers are big-endian.
//! Strings are length-prefixed (u16 len + UTF-8).
//! Frame format: len:u32 | kind:u32 | count:u16 | strings | data_len:u32 | data

use crate::error::ReplicationError;
use crate::snapshot::SnapshotEntry;
use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Protocol version string. Peers must match byte for byte.
pub const PROTOCOL_VERSION: &str = "zsync/1.0";

/// Maximum control message size (64MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// Command
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandKind {
    Version = 0,
    ListSnapshots = 1,
    Receive = 2,
    Result = 4,
}

impl CommandKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Version),
            1 => Some(Self::ListSnapshots),
            2 => Some(Self::Receive),
            4 => Some(Self::Result),
            _ => None,
        }
    }
}

/// The single control message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub params: Vec<String>,
    pub data: Bytes,
}

impl Command {
    pub fn new(kind: CommandKind, params: Vec<String>) -> Self {
        Self {
            kind,
            params,
            data: Bytes::new(),
        }
    }

    pub fn version() -> Self {
        Self::new(CommandKind::Version, vec![PROTOCOL_VERSION.to_string()])
    }

    pub fn list_snapshots(dataset: impl Into<String>) -> Self {
        Self::new(CommandKind::ListSnapshots, vec![dataset.into()])
    }

    pub fn result() -> Self {
        Self::new(CommandKind::Result, Vec::new())
    }

    /// Reply to a ListSnapshots request.
    pub fn snapshot_list(entries: &[SnapshotEntry]) -> Result<Self> {
        let data = bincode::serialize(entries).context("Failed to encode snapshot list")?;
        Ok(Self {
            kind: CommandKind::ListSnapshots,
            params: Vec::new(),
            data: Bytes::from(data),
        })
    }

    /// Decode the entries carried by a ListSnapshots reply.
    pub fn into_snapshot_list(self) -> Result<Vec<SnapshotEntry>> {
        if self.kind != CommandKind::ListSnapshots {
            return Err(ReplicationError::UnexpectedCommand {
                got: self.kind,
                context: "in reply to ListSnapshots",
            }
            .into());
        }
        bincode::deserialize(&self.data)
            .map_err(|e| ReplicationError::malformed(self.kind, e.to_string()).into())
    }

    /// First parameter, required by ListSnapshots and Version.
    pub fn first_param(&self) -> Result<&str, ReplicationError> {
        self.params
            .first()
            .map(String::as_str)
            .ok_or_else(|| ReplicationError::malformed(self.kind, "missing parameter"))
    }

    pub fn encode(&self) -> Result<Bytes> {
        let strings_len: usize = self.params.iter().map(|p| 2 + p.len()).sum();
        let payload_len = 4 + 2 + strings_len + 4 + self.data.len();
        if payload_len > MAX_MESSAGE_SIZE {
            return Err(ReplicationError::TooLarge {
                what: "control message",
                size: payload_len,
                limit: MAX_MESSAGE_SIZE,
            }
            .into());
        }
        if self.params.len() > u16::MAX as usize {
            anyhow::bail!("Too many command parameters: {}", self.params.len());
        }

        let mut buf = BytesMut::with_capacity(4 + payload_len);
        buf.put_u32(payload_len as u32);
        buf.put_u32(self.kind as u32);
        buf.put_u16(self.params.len() as u16);
        for param in &self.params {
            let bytes = param.as_bytes();
            if bytes.len() > u16::MAX as usize {
                anyhow::bail!("Command parameter too long: {} bytes", bytes.len());
            }
            buf.put_u16(bytes.len() as u16);
            buf.put_slice(bytes);
        }
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);

        Ok(buf.freeze())
    }

    /// Decode a payload (everything after the length prefix).
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 6 {
            anyhow::bail!("Command payload too short");
        }
        let raw_kind = payload.get_u32();
        let kind =
            CommandKind::from_u32(raw_kind).ok_or(ReplicationError::UnknownCommand(raw_kind))?;

        let count = payload.get_u16() as usize;
        let mut params = Vec::with_capacity(count);
        for i in 0..count {
            if payload.remaining() < 2 {
                return Err(ReplicationError::malformed(
                    kind,
                    format!("parameter {} length truncated", i),
                )
                .into());
            }
            let len = payload.get_u16() as usize;
            if payload.remaining() < len {
                return Err(ReplicationError::malformed(
                    kind,
                    format!(
                        "parameter {} truncated: expected {} bytes, got {}",
                        i,
                        len,
                        payload.remaining()
                    ),
                )
                .into());
            }
            let param = String::from_utf8(payload.copy_to_bytes(len).to_vec())
                .context("Invalid UTF-8 in command parameter")?;
            params.push(param);
        }

        if payload.remaining() < 4 {
            return Err(ReplicationError::malformed(kind, "data length truncated").into());
        }
        let data_len = payload.get_u32() as usize;
        if payload.remaining() < data_len {
            return Err(ReplicationError::malformed(kind, "data truncated").into());
        }
        let data = payload.copy_to_bytes(data_len);

        Ok(Self { kind, params, data })
    }
}

// =============================================================================
// Receive request
// =============================================================================

/// Options applied on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Roll the destination back to its latest snapshot before applying.
    pub rollback: bool,
    /// Mount the destination after applying.
    pub mount: bool,
    /// Stream carries descendant datasets.
    pub recursive: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            rollback: true,
            mount: false,
            recursive: true,
        }
    }
}

const FLAG_ROLLBACK: &str = "rollback";
const FLAG_MOUNT: &str = "mount";
const FLAG_RECURSIVE: &str = "recursive";

/// Ask the receiver to start applying a stream to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub target: String,
    pub options: ApplyOptions,
}

impl ReceiveRequest {
    pub fn new(target: impl Into<String>, options: ApplyOptions) -> Self {
        Self {
            target: target.into(),
            options,
        }
    }

    /// Params: target dataset followed by one word per enabled flag.
    pub fn to_command(&self) -> Command {
        let mut params = vec![self.target.clone()];
        if self.options.rollback {
            params.push(FLAG_ROLLBACK.to_string());
        }
        if self.options.mount {
            params.push(FLAG_MOUNT.to_string());
        }
        if self.options.recursive {
            params.push(FLAG_RECURSIVE.to_string());
        }
        Command::new(CommandKind::Receive, params)
    }

    pub fn from_command(cmd: &Command) -> Result<Self, ReplicationError> {
        if cmd.kind != CommandKind::Receive {
            return Err(ReplicationError::UnexpectedCommand {
                got: cmd.kind,
                context: "where Receive was expected",
            });
        }
        let target = cmd.first_param()?;
        if target.is_empty() {
            return Err(ReplicationError::malformed(cmd.kind, "empty target dataset"));
        }

        let mut options = ApplyOptions {
            rollback: false,
            mount: false,
            recursive: false,
        };
        for flag in &cmd.params[1..] {
            match flag.as_str() {
                FLAG_ROLLBACK => options.rollback = true,
                FLAG_MOUNT => options.mount = true,
                FLAG_RECURSIVE => options.recursive = true,
                other => {
                    return Err(ReplicationError::malformed(
                        cmd.kind,
                        format!("unknown flag {:?}", other),
                    ))
                }
            }
        }

        Ok(Self::new(target, options))
    }
}

// =============================================================================
// Message reading/writing
// =============================================================================

/// Write a command to the stream.
pub async fn write_command<W: AsyncWrite + Unpin>(w: &mut W, cmd: &Command) -> Result<()> {
    trace!(kind = ?cmd.kind, params = ?cmd.params, "write command");
    let frame = cmd.encode()?;
    w.write_all(&frame)
        .await
        .context("Failed to write command")?;
    Ok(())
}

/// Read the next command. Returns `None` on a clean EOF between messages.
pub async fn read_command<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Command>> {
    let mut len_buf = [0u8; 4];
    let got = super::chunk::read_full(r, &mut len_buf)
        .await
        .context("Failed to read command length")?;
    if got == 0 {
        return Ok(None);
    }
    if got < len_buf.len() {
        return Err(ReplicationError::TruncatedStream { expected: 4, got }.into());
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ReplicationError::TooLarge {
            what: "control message",
            size: len,
            limit: MAX_MESSAGE_SIZE,
        }
        .into());
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("Failed to read command payload")?;

    let cmd = Command::decode(Bytes::from(payload))?;
    trace!(kind = ?cmd.kind, params = ?cmd.params, "read command");
    Ok(Some(cmd))
}

// =============================================================================
// Version Negotiation
// =============================================================================

/// Exchange version strings. Any difference is fatal; there is no downgrade.
pub async fn negotiate_version<R, W>(r: &mut R, w: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_command(w, &Command::version()).await?;
    w.flush().await.context("Failed to flush version")?;

    let peer = read_command(r)
        .await?
        .ok_or(ReplicationError::PeerClosed("during version negotiation"))?;
    if peer.kind != CommandKind::Version {
        return Err(ReplicationError::UnexpectedCommand {
            got: peer.kind,
            context: "during version negotiation",
        }
        .into());
    }

    let remote = peer.first_param()?;
    if remote != PROTOCOL_VERSION {
        return Err(ReplicationError::VersionMismatch {
            local: PROTOCOL_VERSION.to_string(),
            remote: remote.to_string(),
        }
        .into());
    }

    debug!("negotiated protocol {}", PROTOCOL_VERSION);
    Ok(())
}

// =============================================================================
// Control channel (requesting side)
// =============================================================================

/// Requesting end of the control protocol.
pub struct ControlChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ControlChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub async fn negotiate(&mut self) -> Result<()> {
        negotiate_version(&mut self.reader, &mut self.writer).await
    }

    /// Ask the peer for a dataset's snapshot history.
    pub async fn list_snapshots(&mut self, dataset: &str) -> Result<Vec<SnapshotEntry>> {
        write_command(&mut self.writer, &Command::list_snapshots(dataset)).await?;
        self.writer.flush().await?;

        let reply = read_command(&mut self.reader)
            .await?
            .ok_or(ReplicationError::PeerClosed("before listing snapshots"))?;
        reply.into_snapshot_list()
    }

    /// Announce the chunk stream. Does not wait for an acknowledgement.
    pub async fn request_receive(&mut self, request: &ReceiveRequest) -> Result<()> {
        write_command(&mut self.writer, &request.to_command()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Wait until the peer confirms the stream was applied.
    pub async fn await_result(&mut self) -> Result<()> {
        let reply = read_command(&mut self.reader)
            .await?
            .ok_or(ReplicationError::PeerClosed("before sending a result"))?;
        if reply.kind != CommandKind::Result {
            return Err(ReplicationError::UnexpectedCommand {
                got: reply.kind,
                context: "while waiting for the receive result",
            }
            .into());
        }
        Ok(())
    }

    /// Transport write half, for the chunk stream.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

// =============================================================================
// Tests
// =============================================================================
