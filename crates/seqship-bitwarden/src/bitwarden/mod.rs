//! Bitwarden integration crate: sub-modules.
//!
//! - REST client for the `bw serve` local vault management API
//! - A `CredentialStore` that resolves logins, one-time codes and key
//!   passphrases from it just in time

pub mod types;
pub mod api;
pub mod store;

pub use types::*;
pub use api::VaultApiClient;
pub use store::BitwardenCredentialStore;
