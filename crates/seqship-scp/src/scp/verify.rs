// ── Remote hash verification ─────────────────────────────────────────────────

use seqship_core::{
    ChecksumSidecar, HashAlgorithm, RemoteIoKind, RemoteSession, TransferError, TransferUnit,
};
use std::path::Path;

/// Recompute the payload digest on the remote for every sidecar of `unit`
/// and compare it with the local checksum file.
///
/// Each remote command gets its own channel and worker thread; both are
/// joined before any comparison. Returns the algorithms that were checked.
pub fn verify_remote(session: &dyn RemoteSession, unit: &TransferUnit) -> Result<Vec<HashAlgorithm>, TransferError> {
    if unit.sidecars.is_empty() {
        return Ok(Vec::new());
    }

    let remote_digests: Vec<Result<String, TransferError>> = std::thread::scope(|scope| {
        let workers: Vec<_> = unit
            .sidecars
            .iter()
            .map(|sidecar| {
                let algorithm = sidecar.algorithm;
                let payload = unit.remote_path.as_path();
                scope.spawn(move || remote_digest(session, algorithm, payload))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| {
                w.join().unwrap_or_else(|_| {
                    Err(TransferError::remote_hash_command_failed("hash worker panicked").log())
                })
            })
            .collect()
    });

    let mut checked = Vec::with_capacity(unit.sidecars.len());
    for (sidecar, remote) in unit.sidecars.iter().zip(remote_digests) {
        let remote = remote?;
        compare(unit, sidecar, &remote)?;
        checked.push(sidecar.algorithm);
    }
    tracing::info!(unit = %unit.label(), algorithms = ?checked, "remote digests match");
    Ok(checked)
}

/// `<tool> -- <path>` with the path shell-quoted.
pub fn hash_command(algorithm: HashAlgorithm, remote: &Path) -> String {
    let path = remote.to_string_lossy();
    format!("{} -- {}", algorithm.remote_tool(), shell_escape::escape(path))
}

fn remote_digest(session: &dyn RemoteSession, algorithm: HashAlgorithm, remote: &Path) -> Result<String, TransferError> {
    let command = hash_command(algorithm, remote);
    let output = session.exec(&command).map_err(|e| {
        let err = if e.kind == RemoteIoKind::Disconnected {
            TransferError::connection_lost(format!("connection lost while running {}", algorithm.remote_tool()))
        } else {
            TransferError::remote_hash_command_failed(format!("cannot run {}", algorithm.remote_tool()))
        };
        err.with_source(e).log()
    })?;

    if output.exit_status != 0 {
        let diagnostic = if output.stderr.trim().is_empty() { &output.stdout } else { &output.stderr };
        return Err(TransferError::remote_hash_command_failed(format!(
            "`{command}` exited with status {}: {}",
            output.exit_status,
            diagnostic.trim()
        ))
        .log());
    }
    digest_in(&output.stdout, algorithm).ok_or_else(|| {
        TransferError::remote_hash_command_failed(format!("`{command}` printed no digest")).log()
    })
}

/// First line whose leading token is a hex digest of the right length.
/// Diagnostics the tool prints alongside are skipped.
fn digest_in(output: &str, algorithm: HashAlgorithm) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find(|token| token.len() == algorithm.hex_len() && token.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(str::to_ascii_lowercase)
}

fn compare(unit: &TransferUnit, sidecar: &ChecksumSidecar, remote: &str) -> Result<(), TransferError> {
    let text = std::fs::read_to_string(&sidecar.local_path).map_err(|e| {
        TransferError::transfer_failed(format!("cannot read {}", sidecar.local_path.display()))
            .with_source(e)
            .log()
    })?;
    let local = first_token(&text).unwrap_or_default();

    if local != remote {
        return Err(TransferError::hash_mismatch(format!(
            "{} mismatch for {}: local={} remote={}",
            sidecar.algorithm,
            unit.remote_path.display(),
            if local.is_empty() { "<empty>" } else { local.as_str() },
            remote
        ))
        .log());
    }
    Ok(())
}

fn first_token(text: &str) -> Option<String> {
    text.split_whitespace().next().map(str::to_ascii_lowercase)
}
