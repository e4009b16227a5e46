use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ── Transfer units ──────────────────────────────────────────────────

/// Digest algorithm of a checksum sidecar file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha512,
}

impl HashAlgorithm {
    /// Remote command that prints `<digest>  <path>` for this algorithm.
    pub fn remote_tool(&self) -> &'static str {
        match self {
            Self::Md5 => "md5sum",
            Self::Sha512 => "sha512sum",
        }
    }

    /// Length of the lowercase hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "MD5"),
            Self::Sha512 => write!(f, "SHA-512"),
        }
    }
}

/// A pre-computed local checksum file and where it lands remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumSidecar {
    pub algorithm: HashAlgorithm,
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
}

/// One logical file delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferUnit {
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
    #[serde(default)]
    pub sidecars: Vec<ChecksumSidecar>,
}

impl TransferUnit {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<PathBuf>) -> Self {
        Self { local_path: local_path.into(), remote_path: remote_path.into(), sidecars: Vec::new() }
    }

    pub fn with_sidecar(
        mut self,
        algorithm: HashAlgorithm,
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<PathBuf>,
    ) -> Self {
        self.sidecars.push(ChecksumSidecar {
            algorithm,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        });
        self
    }

    /// Short label used in log lines.
    pub fn label(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.local_path.display().to_string())
    }

    pub fn sidecar(&self, algorithm: HashAlgorithm) -> Option<&ChecksumSidecar> {
        self.sidecars.iter().find(|s| s.algorithm == algorithm)
    }

    /// Local input checks, run before any connection is opened.
    pub fn validate(&self) -> Result<(), TransferError> {
        if !self.local_path.is_absolute() {
            return Err(TransferError::invalid_unit(format!(
                "local payload path {} is not absolute",
                self.local_path.display()
            )));
        }
        let meta = std::fs::metadata(&self.local_path).map_err(|e| {
            TransferError::invalid_unit(format!(
                "local payload {} is not accessible",
                self.local_path.display()
            ))
            .with_source(e)
        })?;
        if !meta.is_file() {
            return Err(TransferError::invalid_unit(format!(
                "local payload {} is not a regular file",
                self.local_path.display()
            )));
        }
        if meta.len() == 0 {
            return Err(TransferError::invalid_unit(format!(
                "local payload {} is empty",
                self.local_path.display()
            )));
        }
        require_absolute_remote(&self.remote_path)?;

        for sidecar in &self.sidecars {
            require_absolute_remote(&sidecar.remote_path)?;
            if !sidecar.local_path.is_file() {
                return Err(TransferError::invalid_unit(format!(
                    "{} checksum file {} does not exist",
                    sidecar.algorithm,
                    sidecar.local_path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Fails with `PathNotAbsolute` unless `path` is absolute.
pub fn require_absolute_remote(path: &Path) -> Result<(), TransferError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(TransferError::path_not_absolute(format!(
            "remote path {} must be absolute",
            path.display()
        )))
    }
}

// ── Modes ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Input order, stop at the first failure.
    Serial,
    /// Bounded pool, every unit attempted, failures aggregated.
    Parallel,
}

impl FromStr for DispatchMode {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "parallel" => Ok(Self::Parallel),
            other => Err(TransferError::configuration(format!(
                "unknown dispatch mode '{other}' (expected 'serial' or 'parallel')"
            ))),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// How a pre-existing remote directory is treated during preflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryPolicy {
    /// The directory must not exist yet; it is created for this run.
    Fresh,
    /// An existing directory is reused; a missing one is created.
    Reusable,
}

impl Default for DirectoryPolicy {
    fn default() -> Self {
        Self::Fresh
    }
}

/// Mechanism used to push file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Sftp,
    Scp,
}

impl Default for TransferMethod {
    fn default() -> Self {
        Self::Sftp
    }
}

impl FromStr for TransferMethod {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sftp" => Ok(Self::Sftp),
            "scp" => Ok(Self::Scp),
            other => Err(TransferError::configuration(format!(
                "unknown transfer method '{other}' (expected 'sftp' or 'scp')"
            ))),
        }
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// Per-unit outcome.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub unit: TransferUnit,
    pub success: bool,
    pub error: Option<TransferError>,
    pub bytes_transferred: u64,
    pub verified: bool,
    pub duration_ms: u64,
}

impl TransferResult {
    pub fn failed(unit: TransferUnit, error: TransferError) -> Self {
        Self {
            unit,
            success: false,
            error: Some(error),
            bytes_transferred: 0,
            verified: false,
            duration_ms: 0,
        }
    }
}

/// Summary of a completed dispatch.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: DispatchMode,
    pub results: Vec<TransferResult>,
}

impl RunReport {
    pub fn total_bytes(&self) -> u64 {
        self.results.iter().map(|r| r.bytes_transferred).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}
