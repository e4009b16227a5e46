// ── Batch dispatch ───────────────────────────────────────────────────────────

use crate::scp::transfer::Uploader;
use seqship_core::{DispatchMode, RemoteSession, RunReport, TransferError, TransferResult, TransferUnit};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs an [`Uploader`] over many units on one shared transport.
///
/// Uploads are blocking I/O, so each one runs on the blocking pool; the
/// async side only schedules and collects.
#[derive(Clone)]
pub struct TransferDispatcher {
    session: Arc<dyn RemoteSession>,
    uploader: Arc<Uploader>,
}

impl std::fmt::Debug for TransferDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferDispatcher")
            .field("peer", &self.session.peer_label())
            .field("uploader", &self.uploader)
            .finish()
    }
}

impl TransferDispatcher {
    pub fn new(session: Arc<dyn RemoteSession>, uploader: Uploader) -> Self {
        Self { session, uploader: Arc::new(uploader) }
    }

    /// Deliver `units`.
    ///
    /// * `Serial`: input order, the first failure is returned and the rest
    ///   are not attempted.
    /// * `Parallel`: at most `max_workers` uploads in flight; every unit is
    ///   attempted and any failures come back as one `BatchFailed`.
    pub async fn run(
        &self,
        units: Vec<TransferUnit>,
        mode: DispatchMode,
        max_workers: usize,
    ) -> Result<RunReport, TransferError> {
        if max_workers == 0 {
            return Err(TransferError::configuration("max_workers must be at least 1").log());
        }
        tracing::info!(units = units.len(), %mode, max_workers, peer = %self.session.peer_label(), "dispatch started");

        let results = match mode {
            DispatchMode::Serial => self.run_serial(units).await?,
            DispatchMode::Parallel => self.run_parallel(units, max_workers).await?,
        };

        let report = RunReport { mode, results };
        tracing::info!(
            succeeded = report.succeeded(),
            bytes = report.total_bytes(),
            "dispatch finished"
        );
        Ok(report)
    }

    async fn run_serial(&self, units: Vec<TransferUnit>) -> Result<Vec<TransferResult>, TransferError> {
        let mut results = Vec::with_capacity(units.len());
        let total = units.len();
        for (index, unit) in units.into_iter().enumerate() {
            let label = unit.label();
            match self.upload_blocking(unit).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(unit = %label, kind = ?e.kind, skipped = total - index - 1, "serial dispatch stopped");
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    async fn run_parallel(
        &self,
        units: Vec<TransferUnit>,
        max_workers: usize,
    ) -> Result<Vec<TransferResult>, TransferError> {
        let total = units.len();
        let permits = Arc::new(Semaphore::new(max_workers));
        let mut tasks = JoinSet::new();

        for (index, unit) in units.into_iter().enumerate() {
            let permits = permits.clone();
            let this = self.clone();
            tasks.spawn(async move {
                let label = unit.label();
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => this.upload_blocking(unit).await,
                    Err(e) => Err(TransferError::transfer_failed("worker pool closed").with_source(e)),
                };
                (index, label, outcome)
            });
        }

        let mut done: Vec<(usize, TransferResult)> = Vec::with_capacity(total);
        let mut failures: Vec<(usize, String, TransferError)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(result))) => done.push((index, result)),
                Ok((index, label, Err(e))) => failures.push((index, label, e)),
                Err(e) => failures.push((
                    usize::MAX,
                    "<unknown>".to_string(),
                    TransferError::transfer_failed("upload task aborted").with_source(e),
                )),
            }
        }

        if failures.is_empty() {
            done.sort_by_key(|(index, _)| *index);
            return Ok(done.into_iter().map(|(_, r)| r).collect());
        }

        failures.sort_by_key(|(index, _, _)| *index);
        for (_, label, e) in &failures {
            tracing::error!(unit = %label, kind = ?e.kind, "{}", e.message);
        }
        let failed = failures.len();
        let first = failures.swap_remove(0).2;
        Err(TransferError::batch_failed(failed, total, first).log())
    }

    async fn upload_blocking(&self, unit: TransferUnit) -> Result<TransferResult, TransferError> {
        let session = self.session.clone();
        let uploader = self.uploader.clone();
        tokio::task::spawn_blocking(move || uploader.upload(session.as_ref(), &unit))
            .await
            .map_err(|e| TransferError::transfer_failed("upload worker panicked").with_source(e).log())?
    }
}
