use seqship_core::DirectoryPolicy;
use serde::Serialize;
use std::fmt;

/// What kind of remote location a preflight is checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "policy")]
pub enum PreflightTarget {
    /// A drop directory; created when missing.
    Directory(DirectoryPolicy),
    /// A single destination file, which must not exist yet.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PreflightOutcome {
    /// The directory was created by this preflight.
    Created,
    /// An existing directory will be written into.
    Reused,
    /// The file target is free.
    Absent,
}

impl fmt::Display for PreflightOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Reused => write!(f, "reused"),
            Self::Absent => write!(f, "absent"),
        }
    }
}
