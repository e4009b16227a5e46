// ── seqship-sftp / sftp module ────────────────────────────────────────────────
//
// Preflight for a remote drop location:
//   • absolute-path check
//   • stat with "not found" treated as absent
//   • fresh vs. reusable directory semantics, never overwriting a file
//   • directory creation when required

pub mod preflight;
pub mod types;

pub use preflight::RemoteFsPreflight;
pub use types::*;
