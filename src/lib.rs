//! # seqship
//!
//! Delivers sequencing run files to remote storage across a chain of SSH
//! hops, verifying every upload against its checksum files.
//!
//! The protocol work lives in the member crates; this crate wires them into
//! a run: settings, logging, manifest loading and the delivery pipeline.

pub mod delivery;
pub mod logging;
pub mod manifest;
pub mod settings;

pub use delivery::{Delivery, DeliveryRequest};
pub use manifest::Manifest;
pub use settings::DeliverySettings;
