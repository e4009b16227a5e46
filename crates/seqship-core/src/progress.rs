//! Upload progress logging.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

// ─── Peer names ─────────────────────────────────────────────────────────────

/// Reverse-DNS cache for peer addresses, so progress lines read
/// `login.cluster.org` instead of a bare IP. Lives for one run.
#[derive(Debug, Default)]
pub struct PeerNameCache {
    names: Mutex<HashMap<IpAddr, String>>,
}

impl PeerNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached reverse lookup; falls back to the textual IP.
    pub fn resolve(&self, ip: IpAddr) -> String {
        if let Ok(names) = self.names.lock() {
            if let Some(name) = names.get(&ip) {
                return name.clone();
            }
        }
        let name = dns_lookup::lookup_addr(&ip).unwrap_or_else(|_| ip.to_string());
        if let Ok(mut names) = self.names.lock() {
            names.insert(ip, name.clone());
        }
        name
    }

    pub fn len(&self) -> usize {
        self.names.lock().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn seed(&self, ip: IpAddr, name: impl Into<String>) {
        if let Ok(mut names) = self.names.lock() {
            names.insert(ip, name.into());
        }
    }
}

// ─── Progress ───────────────────────────────────────────────────────────────

/// Logs one line per 10% of a single file upload.
#[derive(Debug)]
pub struct TransferProgress {
    peer: String,
    file: String,
    total_bytes: u64,
    last_decile: u64,
    started: Instant,
}

impl TransferProgress {
    pub fn new(peer: impl Into<String>, file: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            peer: peer.into(),
            file: file.into(),
            total_bytes,
            last_decile: 0,
            started: Instant::now(),
        }
    }

    pub fn percent(&self, sent: u64) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (sent as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Record the running byte total; returns true when a line was logged.
    pub fn update(&mut self, sent: u64) -> bool {
        let decile = if self.total_bytes == 0 {
            10
        } else {
            (sent.saturating_mul(10) / self.total_bytes).min(10)
        };
        if decile <= self.last_decile {
            return false;
        }
        self.last_decile = decile;

        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 { sent as f64 / elapsed } else { 0.0 };
        tracing::info!(
            peer = %self.peer,
            file = %self.file,
            bytes = sent,
            speed_bytes_per_sec = speed as u64,
            "({}) {} progress: {:.2}%",
            self.peer,
            self.file,
            self.percent(sent)
        );
        true
    }
}
