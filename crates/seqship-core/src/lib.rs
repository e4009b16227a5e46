//! # seqship – core
//!
//! Types shared by every delivery stage:
//!   • the [`TransferError`] taxonomy
//!   • transfer units, dispatch modes and per-unit results
//!   • the [`RemoteSession`] / [`RemoteFs`] seams over an authenticated transport
//!   • the [`CredentialStore`] seam
//!   • peer-name cache and progress logging

pub mod credentials;
pub mod error;
pub mod progress;
pub mod remote;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

pub use credentials::{CredentialStore, LoginCredentials};
pub use error::{TransferError, TransferErrorKind};
pub use progress::{PeerNameCache, TransferProgress};
pub use remote::{CommandOutput, ProgressFn, RemoteEntry, RemoteFs, RemoteIoError, RemoteIoKind, RemoteSession};
pub use types::*;
