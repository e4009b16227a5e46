//! # seqship – SSH
//!
//! Resolves a target alias into a hop chain and brings up an authenticated,
//! host-key-verified session across it.

pub mod ssh;
