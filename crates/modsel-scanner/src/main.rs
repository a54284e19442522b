use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use modsel_core::{
    spawn_remote_fetch, MasterServerClient, RemoteIngestor, SelectionSession, SessionConfig,
};
use modsel_registry::{ModuleId, RegistryResolver, SelectionStore};
use modsel_scanner::{catalog_rows, load_registry, ScanOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "modsel-scan")]
struct Args {
    /// Additional directories to scan for modules
    #[arg(long = "path", value_name = "DIR")]
    module_dirs: Vec<PathBuf>,

    /// Do not scan the per-user module directory
    #[arg(long)]
    no_default_dir: bool,

    /// Selection file to read instead of the per-user one
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Master server to list remote modules from
    #[arg(long, value_name = "HOST")]
    master_server: Option<String>,

    /// Seconds to wait for the remote module list
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,

    /// Activate these modules for this listing only
    #[arg(long = "select", value_name = "ID")]
    select: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();
    let store_path = match args.config {
        Some(path) => path,
        None => SelectionStore::default_path()?,
    };
    let store = SelectionStore::open(&store_path)
        .with_context(|| format!("failed to read {}", store_path.display()))?;
    let selection = store.selection();

    let options = ScanOptions {
        module_dirs: args.module_dirs,
        skip_default_dir: args.no_default_dir,
        ..ScanOptions::default()
    };
    let registry = load_registry(&options)?;
    let config = SessionConfig::from_selection(&selection);
    let mut session = SelectionSession::open(config, registry, RegistryResolver::default());

    for id in args.select.iter().map(ModuleId::new) {
        if !session.select(&id) {
            tracing::warn!(module = %id, "module cannot be activated");
        }
    }

    if let Some(server) = args.master_server.or(selection.master_server) {
        let client = MasterServerClient::new(&server)?;
        tracing::info!(url = client.url(), "fetching remote module list");
        let feed = spawn_remote_fetch(client).context("failed to start remote fetch")?;
        let mut ingestor = RemoteIngestor::new(feed);
        let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
        while !ingestor.is_done() && Instant::now() < deadline {
            session.poll_remote(&mut ingestor);
            thread::sleep(Duration::from_millis(50));
        }
        session.poll_remote(&mut ingestor);
        if !ingestor.is_done() {
            tracing::warn!("remote module list incomplete after {}s", args.wait_secs);
        }
    }

    if !session.resolution_succeeded() {
        println!("warning: the active selection has unresolved dependencies");
    }
    for row in catalog_rows(&session) {
        println!("{row}");
    }
    Ok(())
}
