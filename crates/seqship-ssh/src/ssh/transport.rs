//! One live SSH session per hop, plus the libssh2 implementations of the
//! authentication and remote-session seams.

use crate::ssh::auth::{AgentKey, AuthAttemptError, AuthChannel, TwoFactorResponder};
use crate::ssh::keepalive::KeepaliveDriver;
use crate::ssh::keys::LoadedKey;
use crate::ssh::tunnels::Tunnel;
use crate::ssh::types::{ConnectSettings, HopSpec};
use secrecy::{ExposeSecret, SecretString};
use seqship_core::{
    CommandOutput, ProgressFn, RemoteEntry, RemoteFs, RemoteIoError, RemoteIoKind, RemoteSession, TransferError,
};
use ssh2::{ErrorCode, ExtendedData, OpenFlags, OpenType, Session, Sftp};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const COPY_CHUNK: usize = 256 * 1024;
const FILE_MODE: i32 = 0o644;

// libssh2 session error codes
const ERR_SOCKET_SEND: i32 = -7;
pub(crate) const ERR_TIMEOUT: i32 = -9;
const ERR_SOCKET_DISCONNECT: i32 = -13;
const ERR_PASSWORD_EXPIRED: i32 = -15;
const ERR_METHOD_NONE: i32 = -17;
const ERR_AUTHENTICATION_FAILED: i32 = -18;
const ERR_PUBLICKEY_UNVERIFIED: i32 = -19;
const ERR_CHANNEL_CLOSED: i32 = -26;
const ERR_SOCKET_TIMEOUT: i32 = -30;
const ERR_SOCKET_RECV: i32 = -43;
const ERR_BAD_SOCKET: i32 = -45;

// SFTP status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_CONNECTION: i32 = 6;
const FX_CONNECTION_LOST: i32 = 7;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_FILE_ALREADY_EXISTS: i32 = 11;
const FX_NO_SPACE_ON_FILESYSTEM: i32 = 14;
const FX_QUOTA_EXCEEDED: i32 = 15;

// ── Error classification ────────────────────────────────────────────

fn classify(err: &ssh2::Error) -> RemoteIoKind {
    let by_code = match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH) => RemoteIoKind::NotFound,
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => RemoteIoKind::PermissionDenied,
        ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => RemoteIoKind::AlreadyExists,
        ErrorCode::SFTP(FX_NO_SPACE_ON_FILESYSTEM | FX_QUOTA_EXCEEDED) => RemoteIoKind::NoSpace,
        ErrorCode::SFTP(FX_NO_CONNECTION | FX_CONNECTION_LOST) => RemoteIoKind::Disconnected,
        ErrorCode::Session(
            ERR_SOCKET_SEND | ERR_SOCKET_RECV | ERR_SOCKET_DISCONNECT | ERR_BAD_SOCKET | ERR_CHANNEL_CLOSED
            | ERR_TIMEOUT | ERR_SOCKET_TIMEOUT,
        ) => RemoteIoKind::Disconnected,
        _ => RemoteIoKind::Other,
    };
    if by_code == RemoteIoKind::Other {
        classify_message(err.message())
    } else {
        by_code
    }
}

fn classify_message(message: &str) -> RemoteIoKind {
    let m = message.to_lowercase();
    if m.contains("quota") || m.contains("no space") {
        RemoteIoKind::NoSpace
    } else if m.contains("closed") || m.contains("disconnect") {
        RemoteIoKind::Disconnected
    } else {
        RemoteIoKind::Other
    }
}

fn classify_io(err: &std::io::Error) -> RemoteIoKind {
    use std::io::ErrorKind::*;
    if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<ssh2::Error>()) {
        return classify(inner);
    }
    match err.kind() {
        BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof | TimedOut => {
            RemoteIoKind::Disconnected
        }
        NotFound => RemoteIoKind::NotFound,
        PermissionDenied => RemoteIoKind::PermissionDenied,
        _ => classify_message(&err.to_string()),
    }
}

fn classify_auth(err: ssh2::Error) -> AuthAttemptError {
    match err.code() {
        ErrorCode::Session(
            ERR_AUTHENTICATION_FAILED | ERR_PUBLICKEY_UNVERIFIED | ERR_PASSWORD_EXPIRED | ERR_METHOD_NONE,
        ) => AuthAttemptError::Rejected(err.to_string()),
        _ if classify(&err) == RemoteIoKind::Disconnected => AuthAttemptError::Transport(err.to_string()),
        _ => AuthAttemptError::Rejected(err.to_string()),
    }
}

// ── Transport ───────────────────────────────────────────────────────

pub struct Transport {
    hop: HopSpec,
    session: Session,
    peer: Option<SocketAddr>,
    /// Set when this hop runs through the previous hop's session.
    tunnel: Option<Tunnel>,
    alive: AtomicBool,
    keepalive: Duration,
    keepalive_driver: Mutex<Option<KeepaliveDriver>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("hop", &self.hop.alias)
            .field("peer", &self.peer)
            .field("tunnel", &self.tunnel)
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .finish()
    }
}

impl Transport {
    pub fn hop(&self) -> &HopSpec {
        &self.hop
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Raw wire-format host key offered during the handshake.
    pub fn host_key_blob(&self) -> Option<Vec<u8>> {
        self.session.host_key().map(|(blob, _)| blob.to_vec())
    }

    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.tunnel.as_ref().map_or(true, Tunnel::is_running)
    }

    /// Drop the connect timeout once the hop is authenticated, so long
    /// remote commands and large writes do not trip it, and start sending
    /// keepalives.
    pub fn finish_setup(&self) {
        self.session.set_timeout(0);
        if self.keepalive.is_zero() {
            return;
        }

        let session = self.session.clone();
        let host = self.hop.hostname.clone();
        let tick = move || match session.keepalive_send() {
            Ok(_) => true,
            Err(e) if classify(&e) == RemoteIoKind::Disconnected => {
                tracing::debug!(%host, error = %e, "keepalive failed, stopping");
                false
            }
            Err(e) => {
                tracing::debug!(%host, error = %e, "keepalive not sent");
                true
            }
        };
        match KeepaliveDriver::spawn(&self.hop.alias, self.keepalive, tick) {
            Ok(driver) => {
                if let Ok(mut slot) = self.keepalive_driver.lock() {
                    *slot = Some(driver);
                }
            }
            Err(e) => tracing::warn!(hop = %self.hop, error = %e, "cannot start keepalive thread"),
        }
    }

    fn stop_keepalive(&self) {
        let driver = self.keepalive_driver.lock().ok().and_then(|mut d| d.take());
        if let Some(mut driver) = driver {
            driver.stop();
        }
    }

    /// Open the `direct-tcpip` channel for the next hop under the connect
    /// timeout. From here on the tunnel pump owns this session and sends
    /// its keepalives.
    pub(crate) fn open_tunnel(
        &self,
        host: &str,
        port: u16,
        timeout_ms: u32,
    ) -> Result<(Tunnel, TcpStream), TransferError> {
        if !self.is_active() {
            return Err(TransferError::transport_inactive(format!(
                "cannot tunnel through {}: peer closed the connection",
                self.hop.hostname
            ))
            .log());
        }
        self.stop_keepalive();
        self.session.set_timeout(timeout_ms);
        let opened = Tunnel::open(&self.session, host, port, self.keepalive);
        self.session.set_timeout(0);
        opened
    }

    /// Disconnect and stop the tunnel this hop rides on. Idempotent.
    pub fn disconnect(&self) {
        self.stop_keepalive();
        if self.alive.swap(false, Ordering::SeqCst) {
            self.session.set_blocking(true);
            let _ = self.session.disconnect(None, "delivery finished", None);
            tracing::debug!(host = %self.hop.hostname, "disconnected");
        }
        if let Some(tunnel) = &self.tunnel {
            tunnel.close();
        }
    }

    fn remote_err(&self, err: ssh2::Error, context: &str) -> RemoteIoError {
        let kind = classify(&err);
        if kind == RemoteIoKind::Disconnected {
            self.alive.store(false, Ordering::SeqCst);
        }
        RemoteIoError::new(kind, format!("{context}: {err}"))
    }

    fn remote_io_err(&self, err: std::io::Error, context: &str) -> RemoteIoError {
        let kind = classify_io(&err);
        if kind == RemoteIoKind::Disconnected {
            self.alive.store(false, Ordering::SeqCst);
        }
        RemoteIoError::new(kind, format!("{context}: {err}"))
    }

    /// Stream `local` into `writer`, reporting the running byte count.
    fn copy_from(&self, local: &Path, writer: &mut dyn Write, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        let mut file = std::fs::File::open(local)
            .map_err(|e| RemoteIoError::new(RemoteIoKind::Other, format!("cannot open {}: {e}", local.display())))?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut sent = 0u64;
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| RemoteIoError::new(RemoteIoKind::Other, format!("cannot read {}: {e}", local.display())))?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(|e| self.remote_io_err(e, "write failed"))?;
            sent += n as u64;
            progress(sent);
        }
        Ok(sent)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── Connector ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct HopConnector {
    settings: ConnectSettings,
}

impl HopConnector {
    pub fn new(settings: ConnectSettings) -> Self {
        Self { settings }
    }

    /// Build the transport for `hop`: direct TCP for the first hop, a
    /// `direct-tcpip` tunnel through `previous` for later ones.
    pub fn connect(&self, hop: &HopSpec, previous: Option<&Transport>) -> Result<Transport, TransferError> {
        let (stream, peer, tunnel) = match previous {
            None => {
                let (stream, peer) = self.dial(hop)?;
                (stream, Some(peer), None)
            }
            Some(prev) => {
                let (tunnel, stream) = prev.open_tunnel(&hop.hostname, hop.port, self.timeout_ms())?;
                (stream, None, Some(tunnel))
            }
        };

        let session = Session::new().map_err(|e| {
            TransferError::transport_creation_failed(format!("cannot create SSH session for {hop}"))
                .with_source(e)
                .log()
        })?;
        session.set_timeout(self.timeout_ms());
        let mut session = session;
        session.set_tcp_stream(stream);
        session.handshake().map_err(|e| {
            TransferError::transport_creation_failed(format!("SSH handshake with {hop} failed"))
                .with_source(e)
                .log()
        })?;
        session.set_keepalive(true, self.settings.keepalive_secs);

        let transport = Transport {
            hop: hop.clone(),
            session,
            peer,
            tunnel,
            alive: AtomicBool::new(true),
            keepalive: Duration::from_secs(u64::from(self.settings.keepalive_secs)),
            keepalive_driver: Mutex::new(None),
        };
        if !transport.is_active() {
            return Err(TransferError::transport_inactive(format!("{hop}: transport not active after handshake")).log());
        }
        tracing::info!(hop = %hop, tunneled = previous.is_some(), "transport established");
        Ok(transport)
    }

    fn dial(&self, hop: &HopSpec) -> Result<(TcpStream, SocketAddr), TransferError> {
        let addrs: Vec<SocketAddr> = (hop.hostname.as_str(), hop.port)
            .to_socket_addrs()
            .map_err(|e| {
                TransferError::transport_creation_failed(format!("cannot resolve {}", hop.hostname))
                    .with_source(e)
                    .log()
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.settings.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    return Ok((stream, addr));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let err = TransferError::transport_creation_failed(format!(
            "cannot connect to {}:{}",
            hop.hostname, hop.port
        ));
        Err(match last_err {
            Some(e) => err.with_source(e),
            None => err,
        }
        .log())
    }

    fn timeout_ms(&self) -> u32 {
        u32::try_from(self.settings.timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

// ── Authentication primitives ───────────────────────────────────────

impl Transport {
    fn agent(&self) -> Result<ssh2::Agent, AuthAttemptError> {
        let unavailable = |e: ssh2::Error| AuthAttemptError::AgentUnavailable(e.to_string());
        let mut agent = self.session.agent().map_err(unavailable)?;
        agent.connect().map_err(unavailable)?;
        agent.list_identities().map_err(unavailable)?;
        Ok(agent)
    }
}

impl AuthChannel for Transport {
    fn agent_keys(&self) -> Result<Vec<AgentKey>, AuthAttemptError> {
        let mut agent = self.agent()?;
        let keys = agent
            .identities()
            .map_err(|e| AuthAttemptError::AgentUnavailable(e.to_string()))?
            .iter()
            .map(|k| AgentKey { blob: k.blob().to_vec(), comment: k.comment().to_string() })
            .collect();
        let _ = agent.disconnect();
        Ok(keys)
    }

    fn auth_agent_key(&self, user: &str, key: &AgentKey) -> Result<(), AuthAttemptError> {
        let mut agent = self.agent()?;
        let identity = agent
            .identities()
            .map_err(|e| AuthAttemptError::AgentUnavailable(e.to_string()))?
            .into_iter()
            .find(|k| k.blob() == key.blob.as_slice())
            .ok_or_else(|| AuthAttemptError::AgentUnavailable("key is no longer loaded".into()))?;
        let result = agent.userauth(user, &identity).map_err(classify_auth);
        let _ = agent.disconnect();
        result
    }

    fn auth_private_key(&self, user: &str, key: &LoadedKey) -> Result<(), AuthAttemptError> {
        let passphrase = key.passphrase.as_ref().map(|p| p.expose_secret().as_str());
        self.session
            .userauth_pubkey_memory(user, None, key.pem.as_str(), passphrase)
            .map_err(classify_auth)
    }

    fn auth_keyboard_interactive(
        &self,
        user: &str,
        responder: &mut TwoFactorResponder,
    ) -> Result<(), AuthAttemptError> {
        self.session.userauth_keyboard_interactive(user, responder).map_err(classify_auth)
    }

    fn auth_password(&self, user: &str, password: &SecretString) -> Result<(), AuthAttemptError> {
        self.session.userauth_password(user, password.expose_secret()).map_err(classify_auth)
    }

    fn is_authenticated(&self) -> bool {
        self.session.authenticated()
    }

    fn is_active(&self) -> bool {
        Transport::is_active(self)
    }
}

// ── Remote session ──────────────────────────────────────────────────

struct SftpFs<'a> {
    sftp: Sftp,
    transport: &'a Transport,
}

impl RemoteFs for SftpFs<'_> {
    fn stat(&self, path: &Path) -> Result<RemoteEntry, RemoteIoError> {
        let st = self
            .sftp
            .stat(path)
            .map_err(|e| self.transport.remote_err(e, &format!("stat {}", path.display())))?;
        Ok(if st.is_dir() {
            RemoteEntry::Directory
        } else if st.is_file() {
            RemoteEntry::File
        } else {
            RemoteEntry::Other
        })
    }

    fn mkdir(&self, path: &Path, mode: i32) -> Result<(), RemoteIoError> {
        self.sftp
            .mkdir(path, mode)
            .map_err(|e| self.transport.remote_err(e, &format!("mkdir {}", path.display())))
    }

    fn put(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE;
        let mut file = self
            .sftp
            .open_mode(remote, flags, FILE_MODE, OpenType::File)
            .map_err(|e| self.transport.remote_err(e, &format!("create {}", remote.display())))?;
        let sent = self.transport.copy_from(local, &mut file, progress)?;
        file.close()
            .map_err(|e| self.transport.remote_err(e, &format!("close {}", remote.display())))?;
        Ok(sent)
    }
}

impl RemoteSession for Transport {
    fn peer_label(&self) -> String {
        format!("{}:{}", self.hop.hostname, self.hop.port)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn is_active(&self) -> bool {
        Transport::is_active(self)
    }

    fn open_fs(&self) -> Result<Box<dyn RemoteFs + '_>, RemoteIoError> {
        let sftp = self.session.sftp().map_err(|e| self.remote_err(e, "SFTP subsystem"))?;
        Ok(Box::new(SftpFs { sftp, transport: self }))
    }

    /// Run `command` on the target. stderr is merged into `stdout` so an
    /// unread stream can never exhaust the channel window; `stderr` is
    /// always empty.
    fn exec(&self, command: &str) -> Result<CommandOutput, RemoteIoError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.remote_err(e, "open session channel"))?;
        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(|e| self.remote_err(e, "merge stderr"))?;
        channel.exec(command).map_err(|e| self.remote_err(e, "exec"))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| self.remote_io_err(e, "read output"))?;
        channel.wait_close().map_err(|e| self.remote_err(e, "close channel"))?;
        let exit_status = channel.exit_status().map_err(|e| self.remote_err(e, "exit status"))?;

        Ok(CommandOutput { stdout, stderr: String::new(), exit_status })
    }

    fn scp_put(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        let size = std::fs::metadata(local)
            .map_err(|e| RemoteIoError::new(RemoteIoKind::Other, format!("cannot stat {}: {e}", local.display())))?
            .len();
        let mut channel = self
            .session
            .scp_send(remote, FILE_MODE, size, None)
            .map_err(|e| self.remote_err(e, &format!("scp {}", remote.display())))?;
        let sent = self.copy_from(local, &mut channel, progress)?;

        channel.send_eof().map_err(|e| self.remote_err(e, "scp eof"))?;
        channel.wait_eof().map_err(|e| self.remote_err(e, "scp eof"))?;
        channel.close().map_err(|e| self.remote_err(e, "scp close"))?;
        channel.wait_close().map_err(|e| self.remote_err(e, "scp close"))?;
        Ok(sent)
    }
}
