use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use ln_chain_swap::api::BackendRegistry;
use ln_chain_swap::config::Config;
use ln_chain_swap::refund::discover_refundable;
use ln_chain_swap::signer::SoftwareSigner;
use ln_chain_swap::swap::checker::{SwapChecker, SwapNotifier};
use ln_chain_swap::swap::store::{SqliteSwapStore, SwapStore};
use ln_chain_swap::ws::{StatusChannel, StatusChannelConfig};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[arg(long, default_value = "swaps.sqlite")]
    store: PathBuf,

    /// Hex-encoded BIP32 seed for the swap keys.
    #[arg(long, env = "SWAP_SEED_HEX")]
    seed_hex: String,

    #[arg(long, default_value = "bitcoin")]
    network: bitcoin::Network,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Follow status updates for all pending swaps (the default).
    Watch,
    /// List stored swaps whose funds are refundable right now.
    Refunds,
}

/// Prints swap failures to stderr; a GUI embedding would plug in its own.
struct ConsoleNotifier;

#[async_trait::async_trait]
impl SwapNotifier for ConsoleNotifier {
    async fn notify_failure(&self, swap_id: &str, message: &str) {
        eprintln!("swap {swap_id} failed: {message}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_chain_swap::logging::init().ok();
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let registry = Arc::new(BackendRegistry::from_config(&config));
    let store = Arc::new(SqliteSwapStore::open(args.store.clone())?);

    let seed = hex::decode(&args.seed_hex).context("decode seed hex")?;
    let signer = Arc::new(SoftwareSigner::from_seed(args.network, &seed)?);

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(config, registry, store, signer).await,
        Command::Refunds => refunds(registry, store).await,
    }
}

async fn watch(
    config: Config,
    registry: Arc<BackendRegistry>,
    store: Arc<SqliteSwapStore>,
    signer: Arc<SoftwareSigner>,
) -> Result<()> {
    let checker = Arc::new(
        SwapChecker::new(registry.clone(), signer, store.clone(), None)
            .with_notifier(Arc::new(ConsoleNotifier)),
    );

    let pending = checker.pending_swaps()?;
    tracing::info!(count = pending.len(), "resuming pending swaps");

    // Follow the backend of the most recent pending swap; stale indexes from
    // a shrunk registry fall back to the primary.
    let index = pending
        .first()
        .map(|swap| config.sanitize_backend_index(swap.backend()))
        .unwrap_or(0);
    let backend = config.backend(index)?;
    let channel = StatusChannel::new(StatusChannelConfig {
        url: backend.ws_url(),
        fallback_url: backend.ws_fallback_url.clone(),
        reconnect_delay: ln_chain_swap::ws::DEFAULT_RECONNECT_DELAY,
    });
    channel.subscribe(pending.iter().map(|swap| swap.id().to_string()), true);

    channel.run(checker).await
}

async fn refunds(registry: Arc<BackendRegistry>, store: Arc<SqliteSwapStore>) -> Result<()> {
    let swaps = store.list()?;
    let refundable = discover_refundable(&registry, &swaps).await;

    if refundable.is_empty() {
        println!("no refundable swaps");
        return Ok(());
    }
    for swap in refundable {
        println!(
            "{}\t{:?}\t{}\t{}",
            swap.id(),
            swap.kind(),
            swap.asset_send(),
            swap.status(),
        );
    }
    Ok(())
}
