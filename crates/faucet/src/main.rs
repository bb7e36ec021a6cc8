//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use cosmos_faucet::memory::MemoryLedger;
use cosmos_faucet::{
    router, AppState, ChainCliClient, FaucetAccount, FaucetConfig, FaucetMetrics, LedgerClient, QuotaStore,
    RequestValidator, RouterOptions, TransferOrchestrator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// Ledger node RPC endpoint
    #[arg(long)]
    node: Option<String>,

    #[arg(long)]
    chain_id: Option<String>,

    /// Chain binary to drive
    #[arg(long)]
    cli_name: Option<String>,

    /// Home directory of the chain binary
    #[arg(long)]
    home: Option<String>,

    #[arg(long)]
    keyring_backend: Option<String>,

    /// Name of the faucet key
    #[arg(long)]
    account_name: Option<String>,

    /// Mnemonic used to import the faucet key when it is missing
    #[arg(long)]
    mnemonic: Option<String>,

    /// Per-request ceiling, e.g. 1000000uarch
    #[arg(long)]
    max_per_request: Option<String>,

    /// Lifetime ceiling per account, e.g. 10000000uarch
    #[arg(long)]
    max_per_account: Option<String>,

    #[arg(long)]
    gas_prices: Option<String>,

    #[arg(long)]
    gas_adjustment: Option<String>,

    #[arg(long)]
    broadcast_mode: Option<String>,

    /// CSV file of `address,allowance` lines
    #[arg(long)]
    whitelist_file: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    /// Serve from an in-memory ledger instead of a chain
    #[arg(long)]
    in_memory: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(self, config: &mut FaucetConfig) {
        let overrides = [
            (self.server_addr, &mut config.server_addr),
            (self.node, &mut config.node),
            (self.chain_id, &mut config.chain_id),
            (self.cli_name, &mut config.binary_name),
            (self.keyring_backend, &mut config.keyring_backend),
            (self.account_name, &mut config.account_name),
            (self.max_per_request, &mut config.max_per_request),
            (self.max_per_account, &mut config.max_per_account),
            (self.gas_prices, &mut config.gas_prices),
            (self.gas_adjustment, &mut config.gas_adjustment),
            (self.broadcast_mode, &mut config.broadcast_mode),
            (self.log_level, &mut config.log_level),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }

        if self.home.is_some() {
            config.home = self.home;
        }
        if self.mnemonic.is_some() {
            config.account_mnemonic = self.mnemonic;
        }
        if self.whitelist_file.is_some() {
            config.whitelist_file = self.whitelist_file;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let debug = args.debug;
    let in_memory = args.in_memory;

    let mut config = match &args.config {
        Some(path) => FaucetConfig::load(path)?,
        None => FaucetConfig::from_env()?,
    };
    args.apply(&mut config);

    // Initialize tracing
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting faucet v{}", env!("CARGO_PKG_VERSION"));

    let limits = Arc::new(config.limits().context("invalid coin limits")?);
    let whitelist = config.whitelist().context("failed to load whitelist")?.map(Arc::new);
    let fees = config.fee_params();
    let confirmation = config.confirmation()?;

    let (ledger, account): (Arc<dyn LedgerClient>, FaucetAccount) = if in_memory {
        warn!("Using an in-memory ledger, no coins will be sent");
        let ledger = Arc::new(MemoryLedger::new("faucet"));
        let account = ledger.faucet_account();
        (ledger as Arc<dyn LedgerClient>, account)
    } else {
        let client = ChainCliClient::new(config.chain_cli_options()?);
        let account = client
            .ensure_account(&config.account_name, config.account_mnemonic.as_deref())
            .await
            .context("faucet account unavailable")?;
        (Arc::new(client) as Arc<dyn LedgerClient>, account)
    };

    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  Node: {} ({})", config.node, config.chain_id);
    info!("  Faucet account: {} ({})", account.name, account.address);
    info!("  Max per request: {}", limits.max_per_request());
    info!("  Max per account: {}", limits.max_per_account());
    info!("  Inclusion timeout: {:?}", confirmation.timeout);
    match &whitelist {
        Some(whitelist) => info!("  Whitelist: {} addresses", whitelist.len()),
        None => info!("  Whitelist: disabled"),
    }

    let metrics = Arc::new(FaucetMetrics::new()?);
    let quota = QuotaStore::new(Arc::clone(&ledger), account.address.clone());
    let validator = RequestValidator::new(limits, whitelist, quota);
    let orchestrator =
        Arc::new(TransferOrchestrator::new(validator, ledger, account, fees, metrics).with_confirmation(confirmation));

    let state = AppState {
        orchestrator,
        chain_id: config.chain_id.as_str().into(),
    };
    let app = router(
        state,
        RouterOptions {
            cors_enabled: config.cors_enabled,
            metrics_enabled: config.metrics_enabled,
        },
    );

    // Start server
    let addr: SocketAddr = config
        .server_addr
        .parse()
        .with_context(|| format!("invalid server address {}", config.server_addr))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
