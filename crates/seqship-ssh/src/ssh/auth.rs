//! Per-hop authentication.
//!
//! Exactly one strategy is chosen per hop and exactly one attempt is made:
//!
//! 1. public key, when the hop has an identity file: the ssh-agent copy of
//!    that key if loaded, otherwise the key read from disk;
//! 2. keyboard-interactive password + one-time code;
//! 3. plain password, for hops flagged [`AuthPreference::Password`].

use crate::ssh::keys::{self, LoadedKey};
use crate::ssh::known_hosts::fingerprint_sha256;
use crate::ssh::types::{AuthPreference, HopSpec};
use secrecy::{ExposeSecret, SecretString};
use seqship_core::{CredentialStore, TransferError};
use ssh2::{KeyboardInteractivePrompt, Prompt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A public key held by the running ssh-agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentKey {
    pub blob: Vec<u8>,
    pub comment: String,
}

impl AgentKey {
    pub fn fingerprint(&self) -> String {
        fingerprint_sha256(&self.blob)
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthAttemptError {
    #[error("server rejected the credentials: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("ssh-agent unavailable: {0}")]
    AgentUnavailable(String),
}

/// The authentication primitives of an unauthenticated transport.
pub trait AuthChannel {
    fn agent_keys(&self) -> Result<Vec<AgentKey>, AuthAttemptError>;

    /// Sign with the agent-held key; the private half never leaves the agent.
    fn auth_agent_key(&self, user: &str, key: &AgentKey) -> Result<(), AuthAttemptError>;

    fn auth_private_key(&self, user: &str, key: &LoadedKey) -> Result<(), AuthAttemptError>;

    fn auth_keyboard_interactive(
        &self,
        user: &str,
        responder: &mut TwoFactorResponder,
    ) -> Result<(), AuthAttemptError>;

    fn auth_password(&self, user: &str, password: &SecretString) -> Result<(), AuthAttemptError>;

    fn is_authenticated(&self) -> bool;

    fn is_active(&self) -> bool;
}

// ── Keyboard-interactive ────────────────────────────────────────────

const ONE_TIME_CODE_MARKERS: [&str; 5] = ["one-time password", "totp", "token", "verification", "code"];

/// Answers keyboard-interactive prompts with a password and a one-time code.
pub struct TwoFactorResponder {
    password: SecretString,
    totp: SecretString,
    answered: usize,
}

impl TwoFactorResponder {
    pub fn new(password: SecretString, totp: SecretString) -> Self {
        Self { password, totp, answered: 0 }
    }

    /// Answer for one prompt, matched case-insensitively. One-time-code
    /// markers are checked first since their prompts often say "password".
    pub fn respond(&self, prompt: &str) -> String {
        let prompt = prompt.to_lowercase();
        if ONE_TIME_CODE_MARKERS.iter().any(|m| prompt.contains(m)) {
            self.totp.expose_secret().clone()
        } else if prompt.contains("password") {
            self.password.expose_secret().clone()
        } else {
            String::new()
        }
    }

    pub fn answered(&self) -> usize {
        self.answered
    }
}

impl KeyboardInteractivePrompt for TwoFactorResponder {
    fn prompt(&mut self, _username: &str, _instructions: &str, prompts: &[Prompt]) -> Vec<String> {
        self.answered += prompts.len();
        prompts.iter().map(|p| self.respond(&p.text)).collect()
    }
}

fn is_six_digits(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

// ── Strategy selection ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    PublicKey(PathBuf),
    KeyboardInteractive,
    Password,
}

impl AuthStrategy {
    pub fn for_hop(hop: &HopSpec) -> Self {
        match (&hop.identity_file, hop.auth_preference) {
            (Some(path), _) => Self::PublicKey(path.clone()),
            (None, AuthPreference::TwoFactor) => Self::KeyboardInteractive,
            (None, AuthPreference::Password) => Self::Password,
        }
    }
}

/// How a hop ended up authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    AgentKey,
    DiskKey,
    KeyboardInteractive,
    Password,
}

pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub fn authenticate(&self, hop: &HopSpec, chan: &dyn AuthChannel) -> Result<AuthMethod, TransferError> {
        let strategy = AuthStrategy::for_hop(hop);
        tracing::debug!(hop = %hop, ?strategy, "authenticating");

        let method = match &strategy {
            AuthStrategy::PublicKey(path) => self.public_key(hop, path, chan)?,
            AuthStrategy::KeyboardInteractive => self.keyboard_interactive(hop, chan)?,
            AuthStrategy::Password => self.password(hop, chan)?,
        };

        if !chan.is_authenticated() {
            return Err(TransferError::authentication_failed(format!(
                "{hop}: still unauthenticated after {method:?} attempt"
            ))
            .log());
        }
        tracing::info!(host = %hop.hostname, user = %hop.user, ?method, "authenticated");
        Ok(method)
    }

    fn public_key(&self, hop: &HopSpec, path: &Path, chan: &dyn AuthChannel) -> Result<AuthMethod, TransferError> {
        keys::validate_identity_file(path)?;

        if let Some(agent_key) = self.find_in_agent(path, chan) {
            if !chan.is_active() {
                return Err(TransferError::transport_inactive(format!("{hop}: peer closed the connection")).log());
            }
            tracing::debug!(host = %hop.hostname, comment = %agent_key.comment, "using ssh-agent key");
            return match chan.auth_agent_key(&hop.user, &agent_key) {
                Ok(()) => Ok(AuthMethod::AgentKey),
                Err(AuthAttemptError::Transport(m)) => Err(TransferError::transport_inactive(format!("{hop}: {m}")).log()),
                Err(e) => Err(TransferError::authentication_rejected(format!(
                    "{hop}: server rejected agent key {}",
                    agent_key.fingerprint()
                ))
                .with_source(e)
                .log()),
            };
        }

        let key = self.load_disk_key(hop, path)?;
        match chan.auth_private_key(&hop.user, &key) {
            Ok(()) => Ok(AuthMethod::DiskKey),
            Err(AuthAttemptError::Transport(m)) => Err(TransferError::transport_inactive(format!("{hop}: {m}")).log()),
            Err(e) => Err(TransferError::authentication_failed(format!(
                "{hop}: public key {} was not accepted",
                path.display()
            ))
            .with_source(e)
            .log()),
        }
    }

    /// The agent key whose fingerprint matches `identity.pub`, if any. An
    /// unreachable agent or unreadable `.pub` counts as "not loaded".
    fn find_in_agent(&self, identity: &Path, chan: &dyn AuthChannel) -> Option<AgentKey> {
        let fingerprint = match keys::public_key_fingerprint(identity) {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!(error = %e, "skipping ssh-agent lookup");
                return None;
            }
        };
        match chan.agent_keys() {
            Ok(loaded) => loaded.into_iter().find(|k| k.fingerprint() == fingerprint),
            Err(e) => {
                tracing::warn!(error = %e, "ssh-agent not usable, falling back to key file");
                None
            }
        }
    }

    fn load_disk_key(&self, hop: &HopSpec, path: &Path) -> Result<LoadedKey, TransferError> {
        let loaded = match keys::load_private_key(path, None) {
            Err(keys::KeyLoadError::PassphraseRequired) => {
                let passphrase = self.store.key_passphrase(&hop.hostname).map_err(TransferError::log)?;
                keys::load_private_key(path, Some(&passphrase))
            }
            other => other,
        };
        loaded.map_err(|e| {
            TransferError::key_load_failed(format!("cannot load private key {}", path.display()))
                .with_source(e)
                .log()
        })
    }

    fn keyboard_interactive(&self, hop: &HopSpec, chan: &dyn AuthChannel) -> Result<AuthMethod, TransferError> {
        let creds = self.store.login(&hop.hostname).map_err(TransferError::log)?;
        if !is_six_digits(creds.totp.expose_secret()) {
            return Err(TransferError::missing_credential(format!(
                "one-time code for {} must be six digits",
                hop.hostname
            ))
            .log());
        }
        if creds.username != hop.user {
            tracing::debug!(host = %hop.hostname, "stored username differs from ssh config User; using config");
        }

        let mut responder = TwoFactorResponder::new(creds.password, creds.totp);
        match chan.auth_keyboard_interactive(&hop.user, &mut responder) {
            Ok(()) => Ok(AuthMethod::KeyboardInteractive),
            Err(e) => Err(TransferError::authentication_failed(format!(
                "{hop}: keyboard-interactive login failed after {} prompt(s)",
                responder.answered()
            ))
            .with_source(e)
            .log()),
        }
    }

    fn password(&self, hop: &HopSpec, chan: &dyn AuthChannel) -> Result<AuthMethod, TransferError> {
        let password = self.store.password(&hop.hostname).map_err(TransferError::log)?;
        match chan.auth_password(&hop.user, &password) {
            Ok(()) => Ok(AuthMethod::Password),
            Err(e) => Err(TransferError::authentication_failed(format!("{hop}: password login failed"))
                .with_source(e)
                .log()),
        }
    }
}
