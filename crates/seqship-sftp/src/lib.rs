//! # seqship – SFTP
//!
//! Remote-filesystem preflight run before any bytes are sent.

pub mod sftp;
