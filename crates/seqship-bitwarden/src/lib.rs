//! # seqship – Bitwarden
//!
//! Credential lookups against a local `bw serve` vault API.

pub mod bitwarden;
