use std::error::Error as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use seqship::delivery::resolve_target;
use seqship::{logging, Delivery, DeliveryRequest, DeliverySettings, Manifest};
use seqship_bitwarden::bitwarden::BitwardenCredentialStore;
use seqship_core::{CredentialStore, DirectoryPolicy, TransferError, TransferMethod};

#[derive(Parser)]
#[command(name = "seqship")]
#[command(about = "Deliver sequencing run files to remote storage over multi-hop SSH")]
#[command(version)]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/seqship/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Upload the units of a manifest to a target host")]
    Deliver(DeliverArgs),
    #[command(about = "Print the hop chain for a target without connecting")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct DeliverArgs {
    /// `Host` alias from the SSH config
    #[arg(long)]
    target: String,

    /// JSON list of transfer units
    #[arg(long)]
    manifest: PathBuf,

    /// serial | parallel
    #[arg(long)]
    mode: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    no_verify: bool,

    /// sftp | scp
    #[arg(long)]
    method: Option<String>,

    /// Run directory to check and create before uploading
    #[arg(long)]
    remote_root: Option<PathBuf>,

    /// Accept an existing --remote-root instead of refusing it
    #[arg(long)]
    reuse_root: bool,
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(long)]
    target: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<(), TransferError> {
    let mut settings = DeliverySettings::load(cli.settings.as_deref())?;

    match cli.command {
        Commands::Resolve(args) => {
            let chain = resolve_target(&settings, &args.target)?;
            for (i, hop) in chain.hops().iter().enumerate() {
                let identity = hop
                    .identity_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| format!("{:?}", hop.auth_preference));
                println!("{}. {} [{}]", i + 1, hop, identity);
            }
            Ok(())
        }
        Commands::Deliver(args) => {
            if let Some(mode) = args.mode {
                settings.mode = mode;
            }
            if let Some(workers) = args.workers {
                settings.max_workers = workers;
            }
            if args.no_verify {
                settings.verify = false;
            }
            if let Some(method) = args.method {
                settings.method = method.parse::<TransferMethod>().map_err(TransferError::log)?;
            }
            if args.reuse_root {
                settings.directory_policy = DirectoryPolicy::Reusable;
            }
            settings.validate()?;

            let manifest = Manifest::load(&args.manifest)?;
            manifest.validate()?;

            let store = credential_store(&settings)?;
            let delivery = Delivery::new(settings, store);
            let report = delivery.run(DeliveryRequest {
                target: args.target,
                units: manifest.units,
                remote_root: args.remote_root,
            })?;
            println!(
                "delivered {} unit(s), {} bytes ({} mode)",
                report.succeeded(),
                report.total_bytes(),
                report.mode
            );
            Ok(())
        }
    }
}

fn credential_store(settings: &DeliverySettings) -> Result<Arc<dyn CredentialStore>, TransferError> {
    let store = BitwardenCredentialStore::new(&settings.credentials).map_err(|e| {
        TransferError::configuration("cannot set up the credential store")
            .with_source(e)
            .log()
    })?;
    Ok(Arc::new(store))
}
