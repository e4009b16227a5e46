//! In-memory fakes for [`RemoteSession`] and [`CredentialStore`].

use crate::credentials::{CredentialStore, LoginCredentials};
use crate::error::TransferError;
use crate::remote::{
    CommandOutput, ProgressFn, RemoteEntry, RemoteFs, RemoteIoError, RemoteIoKind, RemoteSession,
};
use secrecy::SecretString;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ── MockRemote ──────────────────────────────────────────────────────

/// A fake remote host with a flat path → entry table.
#[derive(Debug)]
pub struct MockRemote {
    entries: Mutex<HashMap<PathBuf, RemoteEntry>>,
    digests: Mutex<HashMap<(String, String), CommandOutput>>,
    put_failures: Mutex<HashMap<PathBuf, RemoteIoError>>,
    open_failure: Mutex<Option<RemoteIoError>>,
    stat_failure: Mutex<Option<RemoteIoError>>,
    mkdir_failure: Mutex<Option<RemoteIoError>>,
    put_delay: Mutex<Duration>,
    active: AtomicBool,
    pub puts: Mutex<Vec<PathBuf>>,
    pub mkdirs: Mutex<Vec<PathBuf>>,
    pub commands: Mutex<Vec<String>>,
    pub fs_opened: AtomicUsize,
    pub fs_closed: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            digests: Mutex::new(HashMap::new()),
            put_failures: Mutex::new(HashMap::new()),
            open_failure: Mutex::new(None),
            stat_failure: Mutex::new(None),
            mkdir_failure: Mutex::new(None),
            put_delay: Mutex::new(Duration::ZERO),
            active: AtomicBool::new(true),
            puts: Mutex::new(Vec::new()),
            mkdirs: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            fs_opened: AtomicUsize::new(0),
            fs_closed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.entries.lock().unwrap().insert(path.into(), RemoteEntry::Directory);
        self
    }

    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        self.entries.lock().unwrap().insert(path.into(), RemoteEntry::File);
        self
    }

    /// Output of `<tool> -- <path>` on the fake host.
    pub fn with_digest(self, tool: &str, path: impl AsRef<Path>, digest: &str) -> Self {
        let key = (tool.to_string(), path.as_ref().display().to_string());
        let out = CommandOutput {
            stdout: format!("{}  {}\n", digest, path.as_ref().display()),
            stderr: String::new(),
            exit_status: 0,
        };
        self.digests.lock().unwrap().insert(key, out);
        self
    }

    pub fn with_failing_command(self, tool: &str, path: impl AsRef<Path>, exit_status: i32, stderr: &str) -> Self {
        let key = (tool.to_string(), path.as_ref().display().to_string());
        let out = CommandOutput { stdout: String::new(), stderr: stderr.to_string(), exit_status };
        self.digests.lock().unwrap().insert(key, out);
        self
    }

    /// Exact output for `<tool> -- <path>`.
    pub fn with_command_output(self, tool: &str, path: impl AsRef<Path>, output: CommandOutput) -> Self {
        let key = (tool.to_string(), path.as_ref().display().to_string());
        self.digests.lock().unwrap().insert(key, output);
        self
    }

    pub fn fail_put(self, path: impl Into<PathBuf>, kind: RemoteIoKind, message: &str) -> Self {
        self.put_failures.lock().unwrap().insert(path.into(), RemoteIoError::new(kind, message));
        self
    }

    pub fn fail_open(self, kind: RemoteIoKind, message: &str) -> Self {
        *self.open_failure.lock().unwrap() = Some(RemoteIoError::new(kind, message));
        self
    }

    pub fn fail_stat(self, kind: RemoteIoKind, message: &str) -> Self {
        *self.stat_failure.lock().unwrap() = Some(RemoteIoError::new(kind, message));
        self
    }

    pub fn fail_mkdir(self, kind: RemoteIoKind, message: &str) -> Self {
        *self.mkdir_failure.lock().unwrap() = Some(RemoteIoError::new(kind, message));
        self
    }

    pub fn with_put_delay(self, delay: Duration) -> Self {
        *self.put_delay.lock().unwrap() = delay;
        self
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn entry(&self, path: impl AsRef<Path>) -> Option<RemoteEntry> {
        self.entries.lock().unwrap().get(path.as_ref()).copied()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    fn put_inner(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.put_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let result = self.put_checked(local, remote, progress);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn put_checked(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        if let Some(err) = self.put_failures.lock().unwrap().get(remote) {
            return Err(err.clone());
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(remote) {
            return Err(RemoteIoError::new(
                RemoteIoKind::AlreadyExists,
                format!("{} already exists", remote.display()),
            ));
        }
        let bytes = std::fs::metadata(local)
            .map(|m| m.len())
            .map_err(|e| RemoteIoError::new(RemoteIoKind::Other, e.to_string()))?;
        entries.insert(remote.to_path_buf(), RemoteEntry::File);
        drop(entries);
        progress(bytes);
        self.puts.lock().unwrap().push(remote.to_path_buf());
        Ok(bytes)
    }
}

struct MockFs<'a> {
    remote: &'a MockRemote,
}

impl RemoteFs for MockFs<'_> {
    fn stat(&self, path: &Path) -> Result<RemoteEntry, RemoteIoError> {
        if let Some(err) = self.remote.stat_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.remote
            .entry(path)
            .ok_or_else(|| RemoteIoError::not_found(format!("{}: no such file", path.display())))
    }

    fn mkdir(&self, path: &Path, _mode: i32) -> Result<(), RemoteIoError> {
        if let Some(err) = self.remote.mkdir_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.remote.entries.lock().unwrap().insert(path.to_path_buf(), RemoteEntry::Directory);
        self.remote.mkdirs.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn put(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        self.remote.put_inner(local, remote, progress)
    }
}

impl Drop for MockFs<'_> {
    fn drop(&mut self) {
        self.remote.fs_closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl RemoteSession for MockRemote {
    fn peer_label(&self) -> String {
        "mock.example.org:22".to_string()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn open_fs(&self) -> Result<Box<dyn RemoteFs + '_>, RemoteIoError> {
        if let Some(err) = self.open_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.fs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockFs { remote: self }))
    }

    fn exec(&self, command: &str) -> Result<CommandOutput, RemoteIoError> {
        self.commands.lock().unwrap().push(command.to_string());
        let (tool, path) = command.split_once(" -- ").unwrap_or((command, ""));
        let path = path.trim().trim_matches('\'');
        let key = (tool.trim().to_string(), path.to_string());
        Ok(self.digests.lock().unwrap().get(&key).cloned().unwrap_or(CommandOutput {
            stdout: String::new(),
            stderr: format!("{tool}: {path}: No such file or directory"),
            exit_status: 1,
        }))
    }

    fn scp_put(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        self.put_inner(local, remote, progress)
    }
}

// ── MemoryCredentialStore ───────────────────────────────────────────

/// Credential store backed by maps, counting every lookup.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    logins: HashMap<String, (String, String, String)>,
    passwords: HashMap<String, String>,
    passphrases: HashMap<String, String>,
    pub lookups: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_login(mut self, host: &str, username: &str, password: &str, totp: &str) -> Self {
        self.logins
            .insert(host.to_string(), (username.to_string(), password.to_string(), totp.to_string()));
        self
    }

    pub fn with_password(mut self, host: &str, password: &str) -> Self {
        self.passwords.insert(host.to_string(), password.to_string());
        self
    }

    pub fn with_passphrase(mut self, host: &str, passphrase: &str) -> Self {
        self.passphrases.insert(host.to_string(), passphrase.to_string());
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn login(&self, host: &str) -> Result<LoginCredentials, TransferError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let (username, password, totp) = self
            .logins
            .get(host)
            .ok_or_else(|| TransferError::missing_credential(format!("no login for {host}")))?;
        Ok(LoginCredentials {
            username: username.clone(),
            password: SecretString::new(password.clone()),
            totp: SecretString::new(totp.clone()),
        })
    }

    fn password(&self, host: &str) -> Result<SecretString, TransferError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.passwords
            .get(host)
            .map(|p| SecretString::new(p.clone()))
            .ok_or_else(|| TransferError::missing_credential(format!("no password for {host}")))
    }

    fn key_passphrase(&self, host: &str) -> Result<SecretString, TransferError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.passphrases
            .get(host)
            .map(|p| SecretString::new(p.clone()))
            .ok_or_else(|| TransferError::missing_credential(format!("no key passphrase for {host}")))
    }
}
