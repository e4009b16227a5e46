//! Seams between the delivery stages and a live, authenticated SSH session.
//!
//! The preflight and upload stages only ever talk to these traits; the SSH
//! crate implements them on top of libssh2, tests implement them in memory.

use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Coarse classification of a remote I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteIoKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    /// The peer closed the connection or the transport died.
    Disconnected,
    /// Disk full or quota exceeded on the remote side.
    NoSpace,
    Other,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteIoError {
    pub kind: RemoteIoKind,
    pub message: String,
}

impl RemoteIoError {
    pub fn new(kind: RemoteIoKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteIoKind::NotFound, message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(RemoteIoKind::Disconnected, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteIoKind::NotFound
    }
}

/// What a remote path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntry {
    Directory,
    File,
    Other,
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    /// Empty when the session merges stderr into `stdout`.
    pub stderr: String,
    pub exit_status: i32,
}

/// Byte-count callback invoked with the running total during a put.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64);

/// A file-system session (SFTP) on an authenticated transport.
///
/// Dropping the handle closes the session.
pub trait RemoteFs {
    fn stat(&self, path: &Path) -> Result<RemoteEntry, RemoteIoError>;

    fn mkdir(&self, path: &Path, mode: i32) -> Result<(), RemoteIoError>;

    /// Upload `local` to `remote`, refusing to replace an existing file.
    fn put(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError>;
}

/// An authenticated transport to the final hop.
pub trait RemoteSession: Send + Sync {
    /// `host:port` of the remote end, for log lines.
    fn peer_label(&self) -> String;

    /// Socket address of the peer, when the transport runs over a direct TCP
    /// connection.
    fn peer_addr(&self) -> Option<SocketAddr>;

    fn is_active(&self) -> bool;

    fn open_fs(&self) -> Result<Box<dyn RemoteFs + '_>, RemoteIoError>;

    /// Run `command` on a fresh session channel and drain its output.
    fn exec(&self, command: &str) -> Result<CommandOutput, RemoteIoError>;

    /// Upload over SCP instead of SFTP.
    fn scp_put(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError>;
}
