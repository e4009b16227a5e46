//! Strict known_hosts verification: unknown hosts and mismatched keys are
//! both fatal, nothing is ever written back.

use crate::ssh::types::{default_port, HopSpec};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use glob::{MatchOptions, Pattern};
use hmac::{Hmac, Mac};
use seqship_core::TransferError;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnownHostsError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("cannot read known_hosts: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    Revoked,
}

#[derive(Debug, Clone)]
enum HostMatcher {
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
    Pattern { negated: bool, pattern: Pattern },
}

impl HostMatcher {
    fn parse(token: &str) -> Option<Self> {
        if let Some(rest) = token.strip_prefix("|1|") {
            let (salt, hash) = rest.split_once('|')?;
            return Some(Self::Hashed {
                salt: STANDARD.decode(salt).ok()?,
                hash: STANDARD.decode(hash).ok()?,
            });
        }
        let (negated, body) = match token.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        // `[host]:port` is literal; glob would read the brackets as a class.
        let compiled = if body.starts_with('[') {
            Pattern::new(&Pattern::escape(body))
        } else {
            Pattern::new(body)
        };
        compiled.ok().map(|pattern| Self::Pattern { negated, pattern })
    }
}

/// One usable known_hosts line.
#[derive(Debug, Clone)]
pub struct KnownHostEntry {
    marker: Marker,
    hosts: Vec<HostMatcher>,
    pub key_type: String,
    pub key: Vec<u8>,
}

impl KnownHostEntry {
    fn matches_host(&self, name: &str) -> bool {
        let opts = MatchOptions { case_sensitive: false, ..MatchOptions::new() };
        let mut hit = false;
        for matcher in &self.hosts {
            match matcher {
                HostMatcher::Hashed { salt, hash } => {
                    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(salt) else {
                        continue;
                    };
                    mac.update(name.as_bytes());
                    if mac.verify_slice(hash).is_ok() {
                        hit = true;
                    }
                }
                HostMatcher::Pattern { negated, pattern } => {
                    if pattern.matches_with(name, opts) {
                        if *negated {
                            return false;
                        }
                        hit = true;
                    }
                }
            }
        }
        hit
    }

    fn is_key(&self, key_type: &str, key: &[u8]) -> bool {
        self.key_type == key_type && self.key == key
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: Vec<KnownHostEntry>,
}

impl KnownHosts {
    /// A missing file is an empty set, which rejects every host.
    pub fn load(path: &Path) -> Result<Self, KnownHostsError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse known_hosts text. Lines that cannot be understood are skipped
    /// with a warning; they never invalidate the rest of the file.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            match parse_line(idx + 1, raw) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "skipping known_hosts line"),
            }
        }
        Self { entries }
    }

    fn lookup<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = &'a KnownHostEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| names.iter().any(|n| e.matches_host(n)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line_no: usize, raw: &str) -> Result<Option<KnownHostEntry>, KnownHostsError> {
    let malformed = |reason: String| KnownHostsError::Malformed { line: line_no, reason };
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut fields = line.split_whitespace();
    let mut first = fields.next().unwrap_or_default();
    let marker = match first {
        "@revoked" => Marker::Revoked,
        "@cert-authority" => return Ok(None),
        m if m.starts_with('@') => return Err(malformed(format!("unknown marker {m}"))),
        _ => Marker::None,
    };
    if marker != Marker::None {
        first = fields.next().unwrap_or_default();
    }
    let (Some(key_type), Some(key_b64)) = (fields.next(), fields.next()) else {
        return Err(malformed("expected hosts, key type and key".into()));
    };
    let key = STANDARD
        .decode(key_b64)
        .map_err(|e| malformed(format!("key is not base64: {e}")))?;
    let hosts = first.split(',').filter_map(HostMatcher::parse).collect();
    Ok(Some(KnownHostEntry { marker, hosts, key_type: key_type.to_string(), key }))
}

/// Algorithm name embedded at the start of an SSH wire-format key blob.
pub fn blob_key_type(blob: &[u8]) -> Option<String> {
    let len = u32::from_be_bytes(blob.get(..4)?.try_into().ok()?) as usize;
    let name = blob.get(4..4 + len)?;
    std::str::from_utf8(name).ok().map(str::to_string)
}

/// `SHA256:<base64>` fingerprint of a key blob, as printed by OpenSSH.
pub fn fingerprint_sha256(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

// ── Validator ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HostKeyValidator {
    default_file: PathBuf,
}

impl HostKeyValidator {
    /// `default_file` is used for hops without a `UserKnownHostsFile`.
    pub fn new(default_file: impl Into<PathBuf>) -> Self {
        Self { default_file: default_file.into() }
    }

    fn file_for<'a>(&'a self, hop: &'a HopSpec) -> &'a Path {
        hop.known_hosts_file.as_deref().unwrap_or(&self.default_file)
    }

    /// Check the key the server offered against the hop's known_hosts file.
    pub fn check(&self, hop: &HopSpec, offered: &[u8]) -> Result<(), TransferError> {
        let path = self.file_for(hop);
        let known = KnownHosts::load(path).map_err(|e| {
            TransferError::unknown_host_key(format!("cannot use known_hosts {}", path.display()))
                .with_source(e)
                .log()
        })?;

        let offered_type = blob_key_type(offered).ok_or_else(|| {
            TransferError::host_key_mismatch(format!("{} offered a malformed host key", hop.hostname)).log()
        })?;
        let fingerprint = fingerprint_sha256(offered);

        let mut names = vec![hop.hostname.clone()];
        if hop.port != default_port() {
            names.push(hop.known_hosts_name());
        }

        let entries: Vec<&KnownHostEntry> = known.lookup(&names).collect();
        if entries.iter().any(|e| e.marker == Marker::Revoked && e.is_key(&offered_type, offered)) {
            return Err(TransferError::host_key_mismatch(format!(
                "{} offered revoked {offered_type} key {fingerprint}",
                hop.hostname
            ))
            .log());
        }

        let mut live = entries.iter().filter(|e| e.marker == Marker::None).peekable();
        if live.peek().is_none() {
            return Err(TransferError::unknown_host_key(format!(
                "{} is not in {} ({offered_type} {fingerprint}); add it out of band",
                hop.known_hosts_name(),
                path.display()
            ))
            .log());
        }
        if live.any(|e| e.is_key(&offered_type, offered)) {
            tracing::debug!(host = %hop.hostname, key_type = %offered_type, %fingerprint, "host key verified");
            Ok(())
        } else {
            Err(TransferError::host_key_mismatch(format!(
                "{} offered {offered_type} key {fingerprint}, which does not match {}",
                hop.known_hosts_name(),
                path.display()
            ))
            .log())
        }
    }
}
