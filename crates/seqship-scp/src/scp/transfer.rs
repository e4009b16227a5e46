// ── Single-unit upload ───────────────────────────────────────────────────────

use crate::scp::verify;
use seqship_core::{
    PeerNameCache, RemoteFs, RemoteIoError, RemoteIoKind, RemoteSession, TransferError, TransferMethod,
    TransferProgress, TransferResult, TransferUnit,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Uploads one unit (payload plus checksum sidecars) and optionally checks
/// the remote digests afterwards.
#[derive(Debug, Clone)]
pub struct Uploader {
    method: TransferMethod,
    verify: bool,
    peer_names: Arc<PeerNameCache>,
}

impl Uploader {
    pub fn new(method: TransferMethod, verify: bool, peer_names: Arc<PeerNameCache>) -> Self {
        Self { method, verify, peer_names }
    }

    pub fn method(&self) -> TransferMethod {
        self.method
    }

    pub fn verifies(&self) -> bool {
        self.verify
    }

    pub fn upload(&self, session: &dyn RemoteSession, unit: &TransferUnit) -> Result<TransferResult, TransferError> {
        let started = Instant::now();
        unit.validate().map_err(TransferError::log)?;

        if !session.is_active() {
            return Err(TransferError::connection_lost(format!(
                "transport to {} is no longer active",
                session.peer_label()
            ))
            .log());
        }

        let fs = session.open_fs().map_err(|e| match e.kind {
            RemoteIoKind::Disconnected => TransferError::connection_lost("connection lost opening SFTP session")
                .with_source(e)
                .log(),
            _ => TransferError::sftp_session_failed(format!("cannot open SFTP session on {}", session.peer_label()))
                .with_source(e)
                .log(),
        })?;

        let destinations = std::iter::once(unit.remote_path.as_path())
            .chain(unit.sidecars.iter().map(|s| s.remote_path.as_path()));
        for remote in destinations {
            ensure_absent(fs.as_ref(), remote)?;
        }

        let peer = self.peer_name(session);
        let mut bytes = self.send(session, fs.as_ref(), &peer, &unit.local_path, &unit.remote_path)?;
        for sidecar in &unit.sidecars {
            bytes += self.send(session, fs.as_ref(), &peer, &sidecar.local_path, &sidecar.remote_path)?;
        }
        drop(fs);

        let verified = if self.verify {
            if unit.sidecars.is_empty() {
                tracing::warn!(unit = %unit.label(), "verification requested but unit has no checksum files");
                false
            } else {
                verify::verify_remote(session, unit)?;
                true
            }
        } else {
            false
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            unit = %unit.label(),
            remote = %unit.remote_path.display(),
            bytes,
            verified,
            duration_ms,
            "unit delivered"
        );
        Ok(TransferResult {
            unit: unit.clone(),
            success: true,
            error: None,
            bytes_transferred: bytes,
            verified,
            duration_ms,
        })
    }

    fn peer_name(&self, session: &dyn RemoteSession) -> String {
        match session.peer_addr() {
            Some(addr) => self.peer_names.resolve(addr.ip()),
            None => session.peer_label(),
        }
    }

    fn send(
        &self,
        session: &dyn RemoteSession,
        fs: &dyn RemoteFs,
        peer: &str,
        local: &Path,
        remote: &Path,
    ) -> Result<u64, TransferError> {
        let total = std::fs::metadata(local).map(|m| m.len()).unwrap_or(0);
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| local.display().to_string());
        let mut progress = TransferProgress::new(peer, name, total);
        let mut report = |sent: u64| {
            progress.update(sent);
        };

        let sent = match self.method {
            TransferMethod::Sftp => fs.put(local, remote, &mut report),
            TransferMethod::Scp => session.scp_put(local, remote, &mut report),
        }
        .map_err(|e| put_error(remote, e))?;

        tracing::debug!(local = %local.display(), remote = %remote.display(), bytes = sent, "sent");
        Ok(sent)
    }
}

/// Refuse-overwrite check for one destination.
fn ensure_absent(fs: &dyn RemoteFs, remote: &Path) -> Result<(), TransferError> {
    match fs.stat(remote) {
        Ok(_) => Err(TransferError::target_already_exists(format!(
            "{} already exists on the remote; refusing to overwrite",
            remote.display()
        ))
        .log()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) if e.kind == RemoteIoKind::Disconnected => {
            Err(TransferError::connection_lost(format!("connection lost checking {}", remote.display()))
                .with_source(e)
                .log())
        }
        Err(e) => Err(TransferError::remote_stat_failed(format!("cannot stat {}", remote.display()))
            .with_source(e)
            .log()),
    }
}

fn put_error(remote: &Path, e: RemoteIoError) -> TransferError {
    let err = match e.kind {
        RemoteIoKind::Disconnected => {
            TransferError::connection_lost(format!("peer closed the connection while writing {}", remote.display()))
        }
        RemoteIoKind::NoSpace => {
            TransferError::remote_quota_exceeded(format!("no space left writing {}", remote.display()))
        }
        RemoteIoKind::AlreadyExists => TransferError::target_already_exists(format!(
            "{} appeared on the remote during upload",
            remote.display()
        )),
        _ => TransferError::transfer_failed(format!("upload to {} failed", remote.display())),
    };
    err.with_source(e).log()
}
