//! `direct-tcpip` tunnels that carry the next hop's SSH session.
//!
//! libssh2 only speaks SSH over a socket, so each tunneled hop gets a
//! loopback socket pair: one end is handed to the next `Session`, the other
//! is pumped to and from the channel by a dedicated thread.

use crate::ssh::transport::ERR_TIMEOUT;
use seqship_core::TransferError;
use ssh2::{Channel, ErrorCode, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const PUMP_BUF: usize = 32 * 1024;
const IDLE_SLEEP: Duration = Duration::from_millis(2);

pub struct Tunnel {
    target: String,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("target", &self.target)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Tunnel {
    /// Open a channel to `host:port` through `carrier` and return the tunnel
    /// with the socket the next session should run over.
    ///
    /// The channel open is bounded by whatever timeout `carrier` carries.
    /// `carrier` is then switched to non-blocking mode; from here on it only
    /// serves this tunnel.
    pub fn open(
        carrier: &Session,
        host: &str,
        port: u16,
        keepalive: Duration,
    ) -> Result<(Self, TcpStream), TransferError> {
        let target = format!("{host}:{port}");
        let channel = carrier
            .channel_direct_tcpip(host, port, None)
            .map_err(|e| channel_open_error(&target, e))?;
        if channel.eof() {
            return Err(TransferError::channel_inactive(format!("direct-tcpip channel to {target} closed on open")).log());
        }

        let bridge_err = |e: std::io::Error| {
            TransferError::transport_creation_failed(format!("cannot bridge tunnel to {target}"))
                .with_source(e)
                .log()
        };
        let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(bridge_err)?;
        let addr = listener.local_addr().map_err(bridge_err)?;
        let session_end = TcpStream::connect(addr).map_err(bridge_err)?;
        let (pump_end, _) = listener.accept().map_err(bridge_err)?;
        pump_end.set_nonblocking(true).map_err(bridge_err)?;
        session_end.set_nodelay(true).ok();

        carrier.set_blocking(false);

        let running = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let running = running.clone();
            let stop = stop.clone();
            let carrier = carrier.clone();
            let target = target.clone();
            std::thread::Builder::new()
                .name(format!("tunnel-{target}"))
                .spawn(move || {
                    if let Err(e) = pump(channel, pump_end, &carrier, &stop, keepalive) {
                        tracing::warn!(%target, error = %e, "tunnel closed with error");
                    } else {
                        tracing::debug!(%target, "tunnel closed");
                    }
                    running.store(false, Ordering::SeqCst);
                })
                .map_err(bridge_err)?
        };

        tracing::debug!(%target, "tunnel open");
        Ok((Self { target, running, stop, pump: Mutex::new(Some(handle)) }, session_end))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the pump thread and wait for it. Idempotent.
    pub fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self.pump.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.close();
    }
}

fn channel_open_error(target: &str, e: ssh2::Error) -> TransferError {
    let err = if matches!(e.code(), ErrorCode::Session(ERR_TIMEOUT)) {
        TransferError::transport_creation_failed(format!("timed out opening direct-tcpip channel to {target}"))
    } else {
        TransferError::channel_inactive(format!("direct-tcpip channel to {target} was refused"))
    };
    err.with_source(e).log()
}

fn pump(
    mut channel: Channel,
    mut socket: TcpStream,
    carrier: &Session,
    stop: &AtomicBool,
    keepalive: Duration,
) -> std::io::Result<()> {
    let mut up: Vec<u8> = Vec::new();
    let mut down: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; PUMP_BUF];
    let mut last_keepalive = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let mut progressed = false;

        if up.is_empty() {
            match socket.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    up.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        if !up.is_empty() {
            match channel.write(&up) {
                Ok(n) => {
                    up.drain(..n);
                    progressed |= n > 0;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }

        if down.is_empty() {
            match channel.read(&mut buf) {
                Ok(0) if channel.eof() => break,
                Ok(0) => {}
                Ok(n) => {
                    down.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => return Err(e),
            }
        }
        if !down.is_empty() {
            match socket.write(&down) {
                Ok(n) => {
                    down.drain(..n);
                    progressed |= n > 0;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }

        if !keepalive.is_zero() && last_keepalive.elapsed() >= keepalive {
            // EAGAIN here just means the carrier is busy.
            let _ = carrier.keepalive_send();
            last_keepalive = Instant::now();
        }
        if !progressed {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    let _ = channel.close();
    Ok(())
}
