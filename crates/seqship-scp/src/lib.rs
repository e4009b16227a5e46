//! # seqship – SCP
//!
//! File upload for delivery units:
//!   • SFTP `put` or SCP send, never overwriting a remote file
//!   • remote hash verification against local checksum sidecars
//!   • serial and bounded-parallel dispatch over one shared transport

pub mod scp;
