//! Delivery settings: JSON file with per-field defaults plus environment
//! overrides for the two SSH file paths.

use seqship_bitwarden::bitwarden::BitwardenConfig;
use seqship_core::{DirectoryPolicy, DispatchMode, TransferError, TransferMethod};
use seqship_ssh::ssh::{AuthPreference, ConnectSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SSH_CONFIG_ENV: &str = "SEQSHIP_SSH_CONFIG";
pub const KNOWN_HOSTS_ENV: &str = "SEQSHIP_KNOWN_HOSTS";

fn ssh_dir_file(name: &str) -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ssh").join(name))
        .unwrap_or_else(|| PathBuf::from(".ssh").join(name))
}

fn default_ssh_config_path() -> PathBuf { ssh_dir_file("config") }
fn default_known_hosts_path() -> PathBuf { ssh_dir_file("known_hosts") }
fn default_port() -> u16 { seqship_ssh::ssh::default_port() }
fn default_connect_timeout_secs() -> u64 { seqship_ssh::ssh::default_connect_timeout_secs() }
fn default_keepalive_secs() -> u32 { seqship_ssh::ssh::default_keepalive_secs() }
fn default_mode() -> String { "serial".into() }
fn default_max_workers() -> usize { 4 }
fn default_verify() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySettings {
    #[serde(default = "default_ssh_config_path")]
    pub ssh_config_path: PathBuf,

    /// Used for hops without their own `UserKnownHostsFile`.
    #[serde(default = "default_known_hosts_path")]
    pub known_hosts_path: PathBuf,

    /// Port for hosts whose config block has no `Port`.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u32,

    /// `serial` or `parallel`; checked before anything connects.
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_verify")]
    pub verify: bool,

    #[serde(default)]
    pub method: TransferMethod,

    #[serde(default)]
    pub directory_policy: DirectoryPolicy,

    /// Hostname → forced keyboard-interactive or password login.
    #[serde(default)]
    pub auth_overrides: HashMap<String, AuthPreference>,

    #[serde(default)]
    pub credentials: BitwardenConfig,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            ssh_config_path: default_ssh_config_path(),
            known_hosts_path: default_known_hosts_path(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
            mode: default_mode(),
            max_workers: default_max_workers(),
            verify: default_verify(),
            method: TransferMethod::default(),
            directory_policy: DirectoryPolicy::default(),
            auth_overrides: HashMap::new(),
            credentials: BitwardenConfig::default(),
        }
    }
}

impl DeliverySettings {
    /// `$XDG_CONFIG_HOME/seqship/settings.json` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("seqship").join("settings.json"))
    }

    /// An explicit path must exist; otherwise the default location is used
    /// when present, else built-in defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, TransferError> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, TransferError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TransferError::config_not_found(format!("cannot read settings {}", path.display()))
                .with_source(e)
                .log()
        })?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| {
            TransferError::configuration(format!("invalid settings in {}", path.display()))
                .with_source(e)
                .log()
        })?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(SSH_CONFIG_ENV).filter(|v| !v.is_empty()) {
            self.ssh_config_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(KNOWN_HOSTS_ENV).filter(|v| !v.is_empty()) {
            self.known_hosts_path = PathBuf::from(path);
        }
    }

    pub fn dispatch_mode(&self) -> Result<DispatchMode, TransferError> {
        self.mode.parse::<DispatchMode>().map_err(TransferError::log)
    }

    /// Checks that must pass before any connection is attempted.
    pub fn validate(&self) -> Result<DispatchMode, TransferError> {
        let mode = self.dispatch_mode()?;
        if self.max_workers == 0 {
            return Err(TransferError::configuration("maxWorkers must be at least 1").log());
        }
        if self.connect_timeout_secs == 0 {
            return Err(TransferError::configuration("connectTimeoutSecs must be at least 1").log());
        }
        Ok(mode)
    }

    pub fn connect_settings(&self) -> ConnectSettings {
        ConnectSettings {
            timeout: Duration::from_secs(self.connect_timeout_secs),
            keepalive_secs: self.keepalive_secs,
        }
    }
}
