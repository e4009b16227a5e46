//! Configuration and error types for the vault integration.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Error types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitwardenErrorKind {
    /// The requested item or field does not exist or is empty.
    NotFound,
    /// Vault is locked; `bw serve` answers but cannot read items.
    VaultLocked,
    /// A network or HTTP request error.
    NetworkError,
    /// The `bw serve` API returned an unsuccessful response.
    ApiError,
    /// JSON parsing failure.
    ParseError,
    /// Invalid configuration.
    InvalidConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct BitwardenError {
    pub kind: BitwardenErrorKind,
    pub message: String,
}

impl BitwardenError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { kind: BitwardenErrorKind::NotFound, message: msg.into() }
    }
    pub fn vault_locked(msg: impl Into<String>) -> Self {
        Self { kind: BitwardenErrorKind::VaultLocked, message: msg.into() }
    }
    pub fn network(msg: impl Into<String>) -> Self {
        Self { kind: BitwardenErrorKind::NetworkError, message: msg.into() }
    }
    pub fn api(msg: impl Into<String>) -> Self {
        Self { kind: BitwardenErrorKind::ApiError, message: msg.into() }
    }
    pub fn parse(msg: impl Into<String>) -> Self {
        Self { kind: BitwardenErrorKind::ParseError, message: msg.into() }
    }
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self { kind: BitwardenErrorKind::InvalidConfig, message: msg.into() }
    }
}

// ── Fields ──────────────────────────────────────────────────────────

/// Single-value endpoints of `GET /object/{field}/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultField {
    Username,
    Password,
    Totp,
}

impl VaultField {
    pub fn as_path(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Password => "password",
            Self::Totp => "totp",
        }
    }
}

impl fmt::Display for VaultField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitwardenConfig {
    /// Hostname for `bw serve` binding.
    #[serde(default = "default_serve_hostname")]
    pub serve_hostname: String,

    /// Port for `bw serve` local API.
    #[serde(default = "default_serve_port")]
    pub serve_port: u16,

    /// Timeout in seconds for each API request.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Item whose password field holds every private-key passphrase. When
    /// unset the hop's hostname is used as the item.
    #[serde(default)]
    pub passphrase_item: Option<String>,
}

fn default_serve_port() -> u16 { 8087 }
fn default_serve_hostname() -> String { "localhost".into() }
fn default_timeout() -> u64 { 30 }

impl Default for BitwardenConfig {
    fn default() -> Self {
        Self {
            serve_hostname: default_serve_hostname(),
            serve_port: default_serve_port(),
            timeout_secs: default_timeout(),
            passphrase_item: None,
        }
    }
}
