//! JSON manifest of transfer units: either a bare array or `{"units": [...]}`.

use seqship_core::{TransferError, TransferUnit};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Units(Vec<TransferUnit>),
    Wrapped { units: Vec<TransferUnit> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub units: Vec<TransferUnit>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TransferError::configuration(format!("cannot read manifest {}", path.display()))
                .with_source(e)
                .log()
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TransferError> {
        let file: ManifestFile = serde_json::from_str(text).map_err(|e| {
            TransferError::configuration("manifest is not a list of transfer units")
                .with_source(e)
                .log()
        })?;
        let units = match file {
            ManifestFile::Units(units) | ManifestFile::Wrapped { units } => units,
        };
        if units.is_empty() {
            return Err(TransferError::configuration("manifest contains no transfer units").log());
        }
        Ok(Self { units })
    }

    /// Run local validation on every unit; stops at the first bad one.
    pub fn validate(&self) -> Result<(), TransferError> {
        for unit in &self.units {
            unit.validate().map_err(TransferError::log)?;
        }
        Ok(())
    }
}
