// ── seqship-scp / scp module ──────────────────────────────────────────────────
//
// Upload execution for delivery units:
//   • refuse-overwrite stat of every destination before sending bytes
//   • payload + checksum sidecar upload over SFTP or SCP, with progress lines
//   • remote md5sum / sha512sum verification on parallel command channels
//   • serial (fail-fast) and bounded-parallel (aggregate) dispatch

pub mod batch;
pub mod transfer;
pub mod verify;

pub use batch::TransferDispatcher;
pub use transfer::Uploader;
