// ── Remote preflight ─────────────────────────────────────────────────────────

use crate::sftp::types::{PreflightOutcome, PreflightTarget};
use seqship_core::{
    require_absolute_remote, DirectoryPolicy, RemoteEntry, RemoteFs, RemoteSession, TransferError,
};
use std::path::Path;

const DIR_MODE: i32 = 0o755;

/// Checks a remote drop location over SFTP before anything is uploaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteFsPreflight;

impl RemoteFsPreflight {
    pub fn new() -> Self {
        Self
    }

    /// Make sure `remote` is usable as `target`.
    ///
    /// The SFTP session opened here is closed on every return path.
    pub fn ensure_ready(
        &self,
        session: &dyn RemoteSession,
        remote: &Path,
        target: PreflightTarget,
    ) -> Result<PreflightOutcome, TransferError> {
        require_absolute_remote(remote).map_err(TransferError::log)?;
        if !session.is_active() {
            return Err(TransferError::transport_inactive(format!(
                "transport to {} is not active",
                session.peer_label()
            ))
            .log());
        }

        let fs = session.open_fs().map_err(|e| {
            TransferError::sftp_session_failed(format!("cannot open SFTP session on {}", session.peer_label()))
                .with_source(e)
                .log()
        })?;
        let outcome = Self::check(fs.as_ref(), remote, target);
        drop(fs);

        if let Ok(outcome) = &outcome {
            tracing::info!(remote = %remote.display(), %outcome, "preflight passed");
        }
        outcome
    }

    fn check(fs: &dyn RemoteFs, remote: &Path, target: PreflightTarget) -> Result<PreflightOutcome, TransferError> {
        let existing = match fs.stat(remote) {
            Ok(entry) => Some(entry),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                return Err(TransferError::remote_stat_failed(format!("cannot stat {}", remote.display()))
                    .with_source(e)
                    .log())
            }
        };

        match (existing, target) {
            (Some(RemoteEntry::Directory), PreflightTarget::Directory(DirectoryPolicy::Reusable)) => {
                Ok(PreflightOutcome::Reused)
            }
            (Some(RemoteEntry::Directory), PreflightTarget::Directory(DirectoryPolicy::Fresh)) => {
                Err(TransferError::target_already_exists(format!(
                    "run directory {} already exists; refusing to merge into it",
                    remote.display()
                ))
                .log())
            }
            (Some(_), _) => Err(TransferError::target_already_exists(format!(
                "{} already exists on the remote; move or delete it first",
                remote.display()
            ))
            .log()),
            (None, PreflightTarget::File) => Ok(PreflightOutcome::Absent),
            (None, PreflightTarget::Directory(_)) => {
                fs.mkdir(remote, DIR_MODE).map_err(|e| {
                    TransferError::remote_dir_create_failed(format!("cannot create {}", remote.display()))
                        .with_source(e)
                        .log()
                })?;
                Ok(PreflightOutcome::Created)
            }
        }
    }
}
