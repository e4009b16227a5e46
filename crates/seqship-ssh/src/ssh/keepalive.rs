//! Periodic keepalives for sessions that no tunnel pump is driving.
//!
//! libssh2 only sends a keepalive when asked to, so an authenticated target
//! session gets a small thread that asks on every interval until stopped.
//! The tick runs under the session lock; while another thread is blocked
//! inside libssh2 the tick simply waits its turn.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

pub struct KeepaliveDriver {
    label: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for KeepaliveDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepaliveDriver")
            .field("label", &self.label)
            .field("running", &self.is_running())
            .finish()
    }
}

impl KeepaliveDriver {
    /// Call `tick` every `interval` until it returns `false` or the driver
    /// is stopped.
    pub fn spawn<F>(label: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(format!("keepalive-{label}"))
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !tick() {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self { label: label.to_string(), stop: Some(stop), handle: Some(handle) })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeepaliveDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
