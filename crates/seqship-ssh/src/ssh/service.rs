use super::auth::{AuthChannel, AuthMethod, Authenticator};
use super::known_hosts::HostKeyValidator;
use super::transport::{HopConnector, Transport};
use super::types::{HopChain, HopSpec};
use seqship_core::{CommandOutput, ProgressFn, RemoteFs, RemoteIoError, RemoteSession, TransferError};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// One unauthenticated-then-authenticated hop as the chain builder sees it.
pub trait HopLink: AuthChannel {
    /// Wire-format host key offered during the handshake.
    fn host_key_blob(&self) -> Option<Vec<u8>>;

    /// Called once the hop is verified and authenticated.
    fn finish_setup(&self);

    fn disconnect(&self);
}

/// Opens the link for a hop, through the previous hop's link if any.
pub trait LinkFactory {
    type Link: HopLink;

    fn open(&self, hop: &HopSpec, previous: Option<&Self::Link>) -> Result<Self::Link, TransferError>;
}

impl HopLink for Transport {
    fn host_key_blob(&self) -> Option<Vec<u8>> {
        Transport::host_key_blob(self)
    }

    fn finish_setup(&self) {
        Transport::finish_setup(self)
    }

    fn disconnect(&self) {
        Transport::disconnect(self)
    }
}

impl LinkFactory for HopConnector {
    type Link = Transport;

    fn open(&self, hop: &HopSpec, previous: Option<&Transport>) -> Result<Transport, TransferError> {
        self.connect(hop, previous)
    }
}

/// Connect, verify the host key and authenticate every hop in chain order.
/// A hop is never authenticated before its host key is accepted. Any
/// failure disconnects what was already built, innermost first.
pub fn open_chain<F: LinkFactory>(
    chain: &HopChain,
    factory: &F,
    validator: &HostKeyValidator,
    authenticator: &Authenticator,
) -> Result<Vec<F::Link>, TransferError> {
    if chain.is_empty() {
        return Err(TransferError::invalid_chain("hop chain is empty").log());
    }

    let mut links: Vec<F::Link> = Vec::with_capacity(chain.len());
    for hop in chain.hops() {
        match open_hop(hop, links.last(), factory, validator, authenticator) {
            Ok(link) => links.push(link),
            Err(e) => {
                tracing::warn!(hop = %hop, kind = ?e.kind, "hop failed, tearing down chain");
                disconnect_all(&links);
                return Err(e);
            }
        }
    }
    Ok(links)
}

fn open_hop<F: LinkFactory>(
    hop: &HopSpec,
    previous: Option<&F::Link>,
    factory: &F,
    validator: &HostKeyValidator,
    authenticator: &Authenticator,
) -> Result<F::Link, TransferError> {
    let link = factory.open(hop, previous)?;
    match verify_and_authenticate(hop, &link, validator, authenticator) {
        Ok(method) => {
            link.finish_setup();
            tracing::info!(hop = %hop, ?method, "hop authenticated");
            Ok(link)
        }
        Err(e) => {
            link.disconnect();
            Err(e)
        }
    }
}

fn verify_and_authenticate<L: HopLink>(
    hop: &HopSpec,
    link: &L,
    validator: &HostKeyValidator,
    authenticator: &Authenticator,
) -> Result<AuthMethod, TransferError> {
    let offered = link
        .host_key_blob()
        .ok_or_else(|| TransferError::host_key_mismatch(format!("{hop} did not present a host key")).log())?;
    validator.check(hop, &offered)?;
    authenticator.authenticate(hop, link)
}

fn disconnect_all<L: HopLink>(links: &[L]) {
    for link in links.iter().rev() {
        link.disconnect();
    }
}

/// An authenticated session to the last hop of a chain, together with every
/// intermediate transport it rides on.
#[derive(Debug)]
pub struct SshConnection {
    /// In chain order; the last one talks to the target.
    transports: Vec<Transport>,
    closed: AtomicBool,
}

impl SshConnection {
    pub fn establish(
        chain: &HopChain,
        connector: &HopConnector,
        validator: &HostKeyValidator,
        authenticator: &Authenticator,
    ) -> Result<Self, TransferError> {
        let transports = open_chain(chain, connector, validator, authenticator)?;
        tracing::info!(chain = %chain.aliases().join(" -> "), "connection established");
        Ok(Self { transports, closed: AtomicBool::new(false) })
    }

    pub fn target(&self) -> &Transport {
        // open_chain never returns an empty chain
        &self.transports[self.transports.len() - 1]
    }

    pub fn hops(&self) -> impl Iterator<Item = &HopSpec> {
        self.transports.iter().map(Transport::hop)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Disconnect every hop, innermost first. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        disconnect_all(&self.transports);
        tracing::info!(hops = self.transports.len(), "connection closed");
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl RemoteSession for SshConnection {
    fn peer_label(&self) -> String {
        self.target().peer_label()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.target().peer_addr()
    }

    fn is_active(&self) -> bool {
        !self.is_closed() && self.transports.iter().all(Transport::is_active)
    }

    fn open_fs(&self) -> Result<Box<dyn RemoteFs + '_>, RemoteIoError> {
        if self.is_closed() {
            return Err(RemoteIoError::disconnected("connection already closed"));
        }
        self.target().open_fs()
    }

    fn exec(&self, command: &str) -> Result<CommandOutput, RemoteIoError> {
        if self.is_closed() {
            return Err(RemoteIoError::disconnected("connection already closed"));
        }
        self.target().exec(command)
    }

    fn scp_put(&self, local: &Path, remote: &Path, progress: ProgressFn<'_>) -> Result<u64, RemoteIoError> {
        if self.is_closed() {
            return Err(RemoteIoError::disconnected("connection already closed"));
        }
        self.target().scp_put(local, remote, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::auth::{AgentKey, AuthAttemptError, TwoFactorResponder};
    use crate::ssh::keys::LoadedKey;
    use crate::ssh::types::AuthPreference;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use secrecy::SecretString;
    use seqship_core::testing::MemoryCredentialStore;
    use seqship_core::TransferErrorKind;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::rc::Rc;
    use std::sync::Arc;

    type Events = Rc<RefCell<Vec<String>>>;

    #[derive(Debug)]
    struct FakeLink {
        name: String,
        host_key: Option<Vec<u8>>,
        authenticated: Cell<bool>,
        events: Events,
    }

    impl FakeLink {
        fn record(&self, what: &str) {
            self.events.borrow_mut().push(format!("{what} {}", self.name));
        }

        fn reject(&self, what: &str) -> Result<(), AuthAttemptError> {
            self.record(what);
            Err(AuthAttemptError::Rejected("not offered".into()))
        }
    }

    impl AuthChannel for FakeLink {
        fn agent_keys(&self) -> Result<Vec<AgentKey>, AuthAttemptError> {
            Err(AuthAttemptError::AgentUnavailable("no agent".into()))
        }
        fn auth_agent_key(&self, _user: &str, _key: &AgentKey) -> Result<(), AuthAttemptError> {
            self.reject("agent")
        }
        fn auth_private_key(&self, _user: &str, _key: &LoadedKey) -> Result<(), AuthAttemptError> {
            self.reject("disk")
        }
        fn auth_keyboard_interactive(
            &self,
            _user: &str,
            _responder: &mut TwoFactorResponder,
        ) -> Result<(), AuthAttemptError> {
            self.reject("keyboard_interactive")
        }
        fn auth_password(&self, _user: &str, _password: &SecretString) -> Result<(), AuthAttemptError> {
            self.record("auth");
            self.authenticated.set(true);
            Ok(())
        }
        fn is_authenticated(&self) -> bool {
            self.authenticated.get()
        }
        fn is_active(&self) -> bool {
            true
        }
    }

    impl HopLink for FakeLink {
        fn host_key_blob(&self) -> Option<Vec<u8>> {
            self.host_key.clone()
        }
        fn finish_setup(&self) {
            self.record("ready");
        }
        fn disconnect(&self) {
            self.record("down");
        }
    }

    struct FakeFactory {
        /// Host key each alias presents; missing means none.
        keys: HashMap<String, Vec<u8>>,
        refuse: Option<&'static str>,
        events: Events,
    }

    impl LinkFactory for FakeFactory {
        type Link = FakeLink;

        fn open(&self, hop: &HopSpec, previous: Option<&FakeLink>) -> Result<FakeLink, TransferError> {
            let via = previous.map_or("tcp", |p| p.name.as_str());
            self.events.borrow_mut().push(format!("open {} via {via}", hop.alias));
            if self.refuse == Some(hop.alias.as_str()) {
                return Err(TransferError::transport_creation_failed(format!("cannot reach {}", hop.alias)));
            }
            Ok(FakeLink {
                name: hop.alias.clone(),
                host_key: self.keys.get(&hop.alias).cloned(),
                authenticated: Cell::new(false),
                events: self.events.clone(),
            })
        }
    }

    fn blob(seed: u8) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&11u32.to_be_bytes());
        out.extend_from_slice(b"ssh-ed25519");
        out.extend_from_slice(&32u32.to_be_bytes());
        out.extend_from_slice(&[seed; 32]);
        out
    }

    fn hop(alias: &str, known_hosts: &Path) -> HopSpec {
        HopSpec {
            alias: alias.into(),
            hostname: format!("{alias}.example.org"),
            port: 22,
            user: "alice".into(),
            identity_file: None,
            known_hosts_file: Some(known_hosts.to_path_buf()),
            strict_host_key_checking: true,
            verify_host_key_dns: true,
            identities_only: false,
            auth_preference: AuthPreference::Password,
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        chain: HopChain,
        validator: HostKeyValidator,
        store: Arc<MemoryCredentialStore>,
        events: Events,
    }

    impl Harness {
        /// A gw -> hpc chain whose known_hosts pins `pinned` (alias, key seed).
        fn new(pinned: &[(&str, u8)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let known_hosts: PathBuf = dir.path().join("known_hosts");
            let text: String = pinned
                .iter()
                .map(|(alias, seed)| format!("{alias}.example.org ssh-ed25519 {}\n", STANDARD.encode(blob(*seed))))
                .collect();
            std::fs::write(&known_hosts, text).unwrap();

            let chain = HopChain::new(vec![hop("gw", &known_hosts), hop("hpc", &known_hosts)]);
            let store = Arc::new(
                MemoryCredentialStore::new()
                    .with_password("gw.example.org", "gw-secret")
                    .with_password("hpc.example.org", "hpc-secret"),
            );
            Self {
                validator: HostKeyValidator::new(&known_hosts),
                _dir: dir,
                chain,
                store,
                events: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn factory(&self, offered: &[(&str, u8)], refuse: Option<&'static str>) -> FakeFactory {
            FakeFactory {
                keys: offered.iter().map(|(alias, seed)| (alias.to_string(), blob(*seed))).collect(),
                refuse,
                events: self.events.clone(),
            }
        }

        fn open(&self, factory: &FakeFactory) -> Result<Vec<FakeLink>, TransferError> {
            open_chain(&self.chain, factory, &self.validator, &Authenticator::new(self.store.clone()))
        }

        fn events(&self) -> Vec<String> {
            self.events.borrow().clone()
        }
    }

    #[test]
    fn hops_are_opened_verified_and_authenticated_in_chain_order() {
        let h = Harness::new(&[("gw", 1), ("hpc", 2)]);
        let links = h.open(&h.factory(&[("gw", 1), ("hpc", 2)], None)).unwrap();

        assert_eq!(links.len(), 2);
        assert_eq!(
            h.events(),
            vec!["open gw via tcp", "auth gw", "ready gw", "open hpc via gw", "auth hpc", "ready hpc"]
        );

        h.events.borrow_mut().clear();
        disconnect_all(&links);
        assert_eq!(h.events(), vec!["down hpc", "down gw"]);
    }

    #[test]
    fn empty_known_hosts_fails_before_any_authentication() {
        let h = Harness::new(&[]);
        let err = h.open(&h.factory(&[("gw", 1), ("hpc", 2)], None)).unwrap_err();

        assert_eq!(err.kind, TransferErrorKind::UnknownHostKey);
        assert_eq!(h.events(), vec!["open gw via tcp", "down gw"]);
        assert_eq!(h.store.lookup_count(), 0);
    }

    #[test]
    fn mismatch_on_second_hop_tears_down_innermost_first() {
        let h = Harness::new(&[("gw", 1), ("hpc", 2)]);
        let err = h.open(&h.factory(&[("gw", 1), ("hpc", 9)], None)).unwrap_err();

        assert_eq!(err.kind, TransferErrorKind::HostKeyMismatch);
        assert_eq!(
            h.events(),
            vec!["open gw via tcp", "auth gw", "ready gw", "open hpc via gw", "down hpc", "down gw"]
        );
        assert_eq!(h.store.lookup_count(), 1);
    }

    #[test]
    fn hop_without_host_key_is_a_mismatch() {
        let h = Harness::new(&[("gw", 1), ("hpc", 2)]);
        let err = h.open(&h.factory(&[("hpc", 2)], None)).unwrap_err();

        assert_eq!(err.kind, TransferErrorKind::HostKeyMismatch);
        assert_eq!(h.events(), vec!["open gw via tcp", "down gw"]);
        assert_eq!(h.store.lookup_count(), 0);
    }

    #[test]
    fn unreachable_second_hop_disconnects_the_first() {
        let h = Harness::new(&[("gw", 1), ("hpc", 2)]);
        let err = h.open(&h.factory(&[("gw", 1), ("hpc", 2)], Some("hpc"))).unwrap_err();

        assert_eq!(err.kind, TransferErrorKind::TransportCreationFailed);
        assert_eq!(h.events(), vec!["open gw via tcp", "auth gw", "ready gw", "open hpc via gw", "down gw"]);
    }

    #[test]
    fn empty_chain_is_rejected() {
        let h = Harness::new(&[]);
        let factory = h.factory(&[], None);
        let err = open_chain(
            &HopChain::new(Vec::new()),
            &factory,
            &h.validator,
            &Authenticator::new(h.store.clone()),
        )
        .unwrap_err();
        assert_eq!(err.kind, TransferErrorKind::InvalidChain);
        assert!(h.events().is_empty());
    }
}
