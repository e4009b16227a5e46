use seqship::delivery::resolve_target;
use seqship::{Delivery, DeliveryRequest, DeliverySettings};
use seqship_core::testing::{MemoryCredentialStore, MockRemote};
use seqship_core::{DirectoryPolicy, RemoteIoKind, TransferErrorKind, TransferUnit};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const SSH_CONFIG: &str = "\
Host gateway
    HostName gw.example.org
    User alice
    StrictHostKeyChecking yes
    VerifyHostKeyDNS yes

Host hpc
    HostName login.hpc.example.org
    User alice
    Port 2222
    ProxyJump gateway
    StrictHostKeyChecking yes
    VerifyHostKeyDNS yes

Host loose
    HostName loose.example.org
    User alice
    StrictHostKeyChecking accept-new
    VerifyHostKeyDNS yes
";

fn settings(dir: &TempDir) -> DeliverySettings {
    let ssh_config = dir.path().join("ssh_config");
    std::fs::write(&ssh_config, SSH_CONFIG).unwrap();
    DeliverySettings {
        ssh_config_path: ssh_config,
        known_hosts_path: dir.path().join("known_hosts"),
        verify: false,
        ..DeliverySettings::default()
    }
}

fn delivery(settings: DeliverySettings) -> Delivery {
    Delivery::new(settings, Arc::new(MemoryCredentialStore::new()))
}

fn units(dir: &TempDir, n: usize) -> Vec<TransferUnit> {
    (1..=n)
        .map(|i| {
            let local = dir.path().join(format!("lane{i}.fastq.gz"));
            std::fs::write(&local, format!("reads for lane {i}")).unwrap();
            TransferUnit::new(local, format!("/scratch/run42/lane{i}.fastq.gz"))
        })
        .collect()
}

#[test]
fn resolve_expands_proxy_jump() {
    let dir = TempDir::new().unwrap();
    let chain = resolve_target(&settings(&dir), "hpc").unwrap();
    assert_eq!(chain.aliases(), vec!["gateway", "hpc"]);
    assert_eq!(chain.target().unwrap().port, 2222);
    assert_eq!(chain.hops()[0].port, 22);
}

#[test]
fn run_rejects_policy_violations_before_connecting() {
    let dir = TempDir::new().unwrap();
    let request = DeliveryRequest { target: "loose".into(), units: units(&dir, 1), remote_root: None };
    let err = delivery(settings(&dir)).run(request).unwrap_err();
    assert_eq!(err.kind, TransferErrorKind::PolicyViolation);
}

#[test]
fn run_rejects_unknown_mode_first() {
    let dir = TempDir::new().unwrap();
    let settings = DeliverySettings { mode: "round-robin".into(), ..settings(&dir) };
    let request = DeliveryRequest { target: "hpc".into(), units: units(&dir, 1), remote_root: None };
    let err = delivery(settings).run(request).unwrap_err();
    assert_eq!(err.kind, TransferErrorKind::ConfigurationError);
}

#[test]
fn run_rejects_invalid_units_before_connecting() {
    let dir = TempDir::new().unwrap();
    let request = DeliveryRequest {
        target: "hpc".into(),
        units: vec![TransferUnit::new(dir.path().join("missing.tar"), "/scratch/run42/missing.tar")],
        remote_root: None,
    };
    let err = delivery(settings(&dir)).run(request).unwrap_err();
    assert_eq!(err.kind, TransferErrorKind::InvalidTransferUnit);
}

#[test]
fn run_with_missing_ssh_config() {
    let dir = TempDir::new().unwrap();
    let settings = DeliverySettings { ssh_config_path: dir.path().join("nope"), ..settings(&dir) };
    let request = DeliveryRequest { target: "hpc".into(), units: units(&dir, 1), remote_root: None };
    let err = delivery(settings).run(request).unwrap_err();
    assert_eq!(err.kind, TransferErrorKind::ConfigNotFound);
}

#[test]
fn parallel_delivery_aggregates_a_dropped_unit() {
    let dir = TempDir::new().unwrap();
    let settings = DeliverySettings { mode: "parallel".into(), max_workers: 2, ..settings(&dir) };
    let remote = Arc::new(MockRemote::new().fail_put(
        "/scratch/run42/lane2.fastq.gz",
        RemoteIoKind::Disconnected,
        "peer closed connection",
    ));

    let err = delivery(settings).deliver_over(remote.clone(), units(&dir, 3), None).unwrap_err();

    assert_eq!(err.kind, TransferErrorKind::BatchFailed { failed: 1, total: 3 });
    let first = err.source().unwrap().downcast_ref::<seqship_core::TransferError>().unwrap();
    assert_eq!(first.kind, TransferErrorKind::ConnectionLost);
    assert_eq!(remote.put_count(), 2);
}

#[test]
fn fresh_remote_root_that_exists_stops_the_run() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MockRemote::new().with_dir("/scratch/run42"));
    let err = delivery(settings(&dir))
        .deliver_over(remote.clone(), units(&dir, 2), Some(PathBuf::from("/scratch/run42")))
        .unwrap_err();
    assert_eq!(err.kind, TransferErrorKind::TargetAlreadyExists);
    assert_eq!(remote.put_count(), 0);
}

#[test]
fn reusable_remote_root_delivers_every_unit() {
    let dir = TempDir::new().unwrap();
    let settings = DeliverySettings { directory_policy: DirectoryPolicy::Reusable, ..settings(&dir) };
    let remote = Arc::new(MockRemote::new().with_dir("/scratch/run42"));
    let report = delivery(settings)
        .deliver_over(remote.clone(), units(&dir, 3), Some(PathBuf::from("/scratch/run42")))
        .unwrap();
    assert_eq!(report.succeeded(), 3);
    assert_eq!(remote.put_count(), 3);
}

#[test]
fn missing_remote_root_is_created() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MockRemote::new());
    delivery(settings(&dir))
        .deliver_over(remote.clone(), units(&dir, 1), Some(PathBuf::from("/scratch/run43")))
        .unwrap();
    assert_eq!(*remote.mkdirs.lock().unwrap(), vec![PathBuf::from("/scratch/run43")]);
}
