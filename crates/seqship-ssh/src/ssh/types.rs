use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ── Defaults ────────────────────────────────────────────────────────

pub fn default_port() -> u16 {
    22
}

pub fn default_connect_timeout_secs() -> u64 {
    30
}

pub fn default_keepalive_secs() -> u32 {
    30
}

// ── Hops ────────────────────────────────────────────────────────────

/// Which non-key strategy a hop uses when it has no identity file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthPreference {
    /// Keyboard-interactive with password + one-time code.
    #[default]
    TwoFactor,
    /// Plain password.
    Password,
}

/// Resolved, policy-checked connection parameters for one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HopSpec {
    /// The `Host` alias this hop was resolved from.
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub known_hosts_file: Option<PathBuf>,
    pub strict_host_key_checking: bool,
    pub verify_host_key_dns: bool,
    pub identities_only: bool,
    pub auth_preference: AuthPreference,
}

impl HopSpec {
    /// `[host]:port` form used by known_hosts for non-default ports.
    pub fn known_hosts_name(&self) -> String {
        if self.port == default_port() {
            self.hostname.clone()
        } else {
            format!("[{}]:{}", self.hostname, self.port)
        }
    }
}

impl fmt::Display for HopSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{} ({})", self.user, self.hostname, self.port, self.alias)
    }
}

/// Ordered hops, nearest first; the last one is the requested target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HopChain {
    hops: Vec<HopSpec>,
}

impl HopChain {
    pub(crate) fn new(hops: Vec<HopSpec>) -> Self {
        Self { hops }
    }

    pub fn hops(&self) -> &[HopSpec] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn target(&self) -> Option<&HopSpec> {
        self.hops.last()
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.hops.iter().map(|h| h.alias.as_str()).collect()
    }
}

// ── Connection settings ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectSettings {
    /// Applies to TCP connect, handshake and authentication.
    pub timeout: Duration,
    pub keepalive_secs: u32,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(default_connect_timeout_secs()),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}
