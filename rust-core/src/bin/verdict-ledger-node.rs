#[cfg(not(feature = "gateway"))]
fn main() {
    eprintln!("Build with --features gateway to enable the ledger node.");
}

#[cfg(feature = "gateway")]
use clap::Parser;

#[cfg(feature = "gateway")]
#[derive(Parser, Debug)]
#[command(name = "verdict-ledger-node", version, about = "Moderation audit ledger node")]
struct Args {
    /// JSON config file; every field is optional.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Submitter secret key, 32 bytes hex.
    #[arg(long, conflicts_with = "key_file")]
    key_hex: Option<String>,

    /// File holding the submitter secret key as hex.
    #[arg(long)]
    key_file: Option<std::path::PathBuf>,

    #[arg(long, env = "VERDICT_LEDGER_LISTEN")]
    listen: Option<String>,

    /// Snapshot directory; the chain is memory-only without one.
    #[arg(long)]
    data_dir: Option<String>,

    #[arg(long, env = "CONFIDENCE_THRESHOLD")]
    confidence_threshold: Option<f64>,
}

#[cfg(feature = "gateway")]
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()) {
        tracing::error!(error = %e, "node failed");
        std::process::exit(1);
    }
}

#[cfg(feature = "gateway")]
fn run(args: Args) -> Result<(), String> {
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tracing::info;
    use verdict_core::chain::ChainLedger;
    use verdict_core::clock::{Clock, SystemClock};
    use verdict_core::gateway::{start_http_server, GatewayState};
    use verdict_core::lexicon::LexiconClassifier;
    use verdict_core::{ModerationConfig, ModerationService, Submitter};

    let mut cfg = match &args.config {
        Some(path) => ModerationConfig::load(path).map_err(|e| e.to_string())?,
        None => ModerationConfig::default(),
    };
    if let Some(t) = args.confidence_threshold {
        cfg.confidence_threshold = t;
    }
    if let Some(addr) = args.listen {
        cfg.node.listen_addr = addr;
    }
    if args.data_dir.is_some() {
        cfg.node.data_dir = args.data_dir;
    }
    cfg.validate().map_err(|e| e.to_string())?;

    let secret_hex = match (args.key_hex, args.key_file) {
        (Some(h), _) => h,
        (None, Some(path)) => fs::read_to_string(&path)
            .map_err(|e| format!("read key file {}: {}", path.display(), e))?,
        (None, None) => return Err("missing --key-hex or --key-file".into()),
    };
    let secret = <[u8; 32]>::try_from(
        hex::decode(secret_hex.trim())
            .map_err(|e| format!("bad secret hex: {}", e))?
            .as_slice(),
    )
    .map_err(|_| "secret key must be 32 bytes hex".to_string())?;
    let submitter = Submitter::from_secret(&secret)?;

    let ledger = Arc::new(match &cfg.node.data_dir {
        Some(dir) => ChainLedger::open(dir, cfg.categories(), cfg.node.max_block_records)
            .map_err(|e| e.to_string())?,
        None => ChainLedger::new(cfg.categories(), cfg.node.max_block_records),
    });
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = Arc::new(ModerationService::new(
        &cfg,
        Arc::new(LexiconClassifier::new(&cfg.lexicon)),
        ledger.clone(),
        Arc::clone(&clock),
        submitter,
    ));

    let addr = start_http_server(
        &cfg.node.listen_addr,
        Arc::new(GatewayState {
            service: Arc::clone(&service),
            chain: Some(Arc::clone(&ledger)),
        }),
    )
    .map_err(|e| format!("bind {}: {}", cfg.node.listen_addr, e))?;
    info!(
        %addr,
        submitter = %service.submitter().id_hex(),
        threshold = cfg.confidence_threshold,
        "verdict ledger node listening"
    );

    let interval = Duration::from_millis(cfg.node.block_interval_ms.max(1));
    loop {
        thread::sleep(interval);
        ledger.commit_pending(clock.now_ms());
    }
}
