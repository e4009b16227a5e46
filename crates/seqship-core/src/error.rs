//! Error taxonomy shared by every delivery stage.
//!
//! All stages report failures as a [`TransferError`]: a [`TransferErrorKind`]
//! that callers match on, a human-readable message, and optionally the
//! lower-level error that caused it.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

// ── Kinds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferErrorKind {
    // configuration time
    /// The SSH client configuration (or settings) file does not exist.
    ConfigNotFound,
    /// A resolved host violates the connection security policy.
    PolicyViolation,
    /// `ProxyJump` expansion visited an alias twice.
    ProxyJumpCycle,
    /// Hop expansion produced an unusable chain.
    InvalidChain,
    /// Settings, dispatch mode or manifest are malformed.
    ConfigurationError,

    // connection time
    TransportCreationFailed,
    ChannelInactive,
    TransportInactive,

    // host keys
    UnknownHostKey,
    HostKeyMismatch,

    // authentication
    InvalidIdentityFile,
    KeyLoadFailed,
    MissingCredential,
    /// The server refused the agent-held key.
    AuthenticationRejected,
    AuthenticationFailed,

    // preflight
    PathNotAbsolute,
    SftpSessionFailed,
    RemoteStatFailed,
    TargetAlreadyExists,
    RemoteDirCreateFailed,

    // transfer
    /// A transfer unit failed local validation before any network I/O.
    InvalidTransferUnit,
    ConnectionLost,
    RemoteQuotaExceeded,
    TransferFailed,
    RemoteHashCommandFailed,
    HashMismatch,

    /// Parallel dispatch finished with `failed` of `total` units failing.
    BatchFailed { failed: usize, total: usize },
}

impl TransferErrorKind {
    /// Whether this failure ends the whole run rather than one unit.
    pub fn is_run_fatal(&self) -> bool {
        use TransferErrorKind::*;
        matches!(
            self,
            ConfigNotFound
                | PolicyViolation
                | ProxyJumpCycle
                | InvalidChain
                | ConfigurationError
                | TransportCreationFailed
                | ChannelInactive
                | TransportInactive
                | UnknownHostKey
                | HostKeyMismatch
                | InvalidIdentityFile
                | KeyLoadFailed
                | MissingCredential
                | AuthenticationRejected
                | AuthenticationFailed
        )
    }
}

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl StdError for TransferError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<TransferError> for String {
    fn from(e: TransferError) -> String {
        e.to_string()
    }
}

impl TransferError {
    pub fn new(kind: TransferErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into(), source: None }
    }

    /// Attach the underlying error this one was raised from.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Log at error severity and hand the error back, for use in
    /// `map_err` / `return Err(..)` chains.
    pub fn log(self) -> Self {
        match &self.source {
            Some(source) => tracing::error!(kind = ?self.kind, cause = %source, "{}", self.message),
            None => tracing::error!(kind = ?self.kind, "{}", self.message),
        }
        self
    }

    pub fn config_not_found(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::ConfigNotFound, msg)
    }
    pub fn policy_violation(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::PolicyViolation, msg)
    }
    pub fn proxy_jump_cycle(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::ProxyJumpCycle, msg)
    }
    pub fn invalid_chain(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::InvalidChain, msg)
    }
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::ConfigurationError, msg)
    }
    pub fn transport_creation_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::TransportCreationFailed, msg)
    }
    pub fn channel_inactive(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::ChannelInactive, msg)
    }
    pub fn transport_inactive(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::TransportInactive, msg)
    }
    pub fn unknown_host_key(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::UnknownHostKey, msg)
    }
    pub fn host_key_mismatch(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::HostKeyMismatch, msg)
    }
    pub fn invalid_identity_file(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::InvalidIdentityFile, msg)
    }
    pub fn key_load_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::KeyLoadFailed, msg)
    }
    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::MissingCredential, msg)
    }
    pub fn authentication_rejected(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::AuthenticationRejected, msg)
    }
    pub fn authentication_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::AuthenticationFailed, msg)
    }
    pub fn path_not_absolute(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::PathNotAbsolute, msg)
    }
    pub fn sftp_session_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::SftpSessionFailed, msg)
    }
    pub fn remote_stat_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::RemoteStatFailed, msg)
    }
    pub fn target_already_exists(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::TargetAlreadyExists, msg)
    }
    pub fn remote_dir_create_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::RemoteDirCreateFailed, msg)
    }
    pub fn invalid_unit(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::InvalidTransferUnit, msg)
    }
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::ConnectionLost, msg)
    }
    pub fn remote_quota_exceeded(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::RemoteQuotaExceeded, msg)
    }
    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::TransferFailed, msg)
    }
    pub fn remote_hash_command_failed(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::RemoteHashCommandFailed, msg)
    }
    pub fn hash_mismatch(msg: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::HashMismatch, msg)
    }

    /// Aggregate for a parallel run; the first failure becomes the source.
    pub fn batch_failed(failed: usize, total: usize, first: TransferError) -> Self {
        let message = format!("{failed} of {total} transfers failed; first failure: {first}");
        Self {
            kind: TransferErrorKind::BatchFailed { failed, total },
            message,
            source: Some(Arc::new(first)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = TransferError::hash_mismatch("md5 differs");
        assert_eq!(err.to_string(), "HashMismatch: md5 differs");
    }

    #[test]
    fn source_is_chained() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "bad header");
        let err = TransferError::key_load_failed("no loader accepted the key").with_source(io);
        let source = err.source().expect("source present");
        assert_eq!(source.to_string(), "bad header");
    }

    #[test]
    fn batch_failed_reports_count_and_first() {
        let first = TransferError::connection_lost("peer closed the connection");
        let err = TransferError::batch_failed(1, 3, first);
        assert_eq!(err.kind, TransferErrorKind::BatchFailed { failed: 1, total: 3 });
        assert!(err.message.contains("1 of 3"));
        assert!(err.message.contains("ConnectionLost"));
        let source = err.source().and_then(|s| s.downcast_ref::<TransferError>()).unwrap();
        assert_eq!(source.kind, TransferErrorKind::ConnectionLost);
    }

    #[test]
    fn run_fatal_classification() {
        assert!(TransferErrorKind::UnknownHostKey.is_run_fatal());
        assert!(TransferErrorKind::AuthenticationRejected.is_run_fatal());
        assert!(!TransferErrorKind::HashMismatch.is_run_fatal());
        assert!(!TransferErrorKind::TargetAlreadyExists.is_run_fatal());
        assert!(!TransferErrorKind::BatchFailed { failed: 1, total: 2 }.is_run_fatal());
    }
}
