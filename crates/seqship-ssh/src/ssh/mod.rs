// ── seqship-ssh / ssh module ──────────────────────────────────────────────────
//
// Multi-hop SSH connectivity for deliveries:
//   • ssh_config + ProxyJump resolution into a policy-checked hop chain
//   • direct TCP for the first hop, direct-tcpip tunnels for the rest
//   • strict known_hosts verification (plain, hashed, @revoked)
//   • per-hop authentication: agent, disk key, 2FA or password
//   • keepalives on every authenticated session
//   • libssh2-backed RemoteSession for SFTP, SCP and remote commands

pub mod auth;
pub mod config;
pub mod keepalive;
pub mod keys;
pub mod known_hosts;
pub mod service;
pub mod transport;
pub mod tunnels;
pub mod types;

pub use auth::{AuthMethod, Authenticator, TwoFactorResponder};
pub use config::{ConfigResolver, SshConfig};
pub use known_hosts::HostKeyValidator;
pub use service::{HopLink, LinkFactory, SshConnection};
pub use transport::{HopConnector, Transport};
pub use types::*;
