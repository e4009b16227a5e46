//! The delivery pipeline: resolve, connect, preflight, dispatch, close.

use crate::settings::DeliverySettings;
use seqship_core::{
    CredentialStore, PeerNameCache, RemoteSession, RunReport, TransferError, TransferUnit,
};
use seqship_scp::scp::{TransferDispatcher, Uploader};
use seqship_sftp::sftp::{PreflightTarget, RemoteFsPreflight};
use seqship_ssh::ssh::{
    Authenticator, ConfigResolver, HopChain, HopConnector, HostKeyValidator, SshConnection,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Hop chain for `target` under `settings`; no network I/O.
pub fn resolve_target(settings: &DeliverySettings, target: &str) -> Result<HopChain, TransferError> {
    ConfigResolver::from_file(&settings.ssh_config_path)?
        .with_default_port(settings.port)
        .with_auth_overrides(settings.auth_overrides.clone())
        .resolve(target)
}

/// What to deliver, and where.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// `Host` alias of the final hop.
    pub target: String,
    pub units: Vec<TransferUnit>,
    /// Run directory checked (and created) before any unit is sent.
    pub remote_root: Option<PathBuf>,
}

pub struct Delivery {
    settings: DeliverySettings,
    credentials: Arc<dyn CredentialStore>,
}

impl Delivery {
    pub fn new(settings: DeliverySettings, credentials: Arc<dyn CredentialStore>) -> Self {
        Self { settings, credentials }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    pub fn resolve(&self, target: &str) -> Result<HopChain, TransferError> {
        resolve_target(&self.settings, target)
    }

    /// Full run. Everything that can be checked locally is checked before the
    /// first hop is dialled; the connection is closed on every exit path.
    ///
    /// Must be called outside any tokio runtime; dispatch gets its own.
    pub fn run(&self, request: DeliveryRequest) -> Result<RunReport, TransferError> {
        self.settings.validate()?;
        if request.units.is_empty() {
            return Err(TransferError::configuration("nothing to deliver").log());
        }
        for unit in &request.units {
            unit.validate().map_err(TransferError::log)?;
        }
        let chain = self.resolve(&request.target)?;

        let connection = SshConnection::establish(
            &chain,
            &HopConnector::new(self.settings.connect_settings()),
            &HostKeyValidator::new(&self.settings.known_hosts_path),
            &Authenticator::new(self.credentials.clone()),
        )?;
        let connection = Arc::new(connection);

        let outcome = self.deliver_over(connection.clone(), request.units, request.remote_root);
        connection.close();
        outcome
    }

    /// Preflight and dispatch over an already authenticated session.
    pub fn deliver_over(
        &self,
        session: Arc<dyn RemoteSession>,
        units: Vec<TransferUnit>,
        remote_root: Option<PathBuf>,
    ) -> Result<RunReport, TransferError> {
        let mode = self.settings.validate()?;

        if let Some(root) = &remote_root {
            let target = PreflightTarget::Directory(self.settings.directory_policy);
            RemoteFsPreflight::new().ensure_ready(session.as_ref(), root, target)?;
        }

        let uploader = Uploader::new(self.settings.method, self.settings.verify, Arc::new(PeerNameCache::new()));
        let dispatcher = TransferDispatcher::new(session, uploader);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(self.settings.max_workers.max(1))
            .enable_all()
            .build()
            .map_err(|e| {
                TransferError::configuration("cannot start the dispatch runtime")
                    .with_source(e)
                    .log()
            })?;
        runtime.block_on(dispatcher.run(units, mode, self.settings.max_workers))
    }
}
