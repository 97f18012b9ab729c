// =============================================================================
// Orion Futures Nexus — Main Entry Point
// =============================================================================
//
// Composition root: loads config, wires the exchange adapter, the reasoning
// client, the executor, and the scheduler together, then runs sequential
// analysis cycles until max runtime or a shutdown signal.
//
// SAFETY: without `--execute` every order is simulated regardless of the
// config's dry_run flag. Live orders additionally require
// `trading.safety.real_trading_enabled: true`.
//
// Exit codes: 0 clean shutdown, 1 fatal initialization failure, 130 signal.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod audit;
mod binance;
mod config;
mod decision;
mod error;
mod executor;
mod indicators;
mod llm;
mod market_data;
mod reconcile;
mod safety;
mod scheduler;
mod state;
mod status;
mod types;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::audit::AuditLog;
use crate::binance::BinanceFuturesClient;
use crate::config::BotConfig;
use crate::scheduler::TradingScheduler;
use crate::state::BotState;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "orion-bot", about = "LLM-driven USDT-margined perpetual futures agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic analyze-and-trade loop.
    Run {
        /// Path to the YAML configuration file.
        #[arg(long)]
        config: PathBuf,
        /// Free-form tag recorded with every audit record.
        #[arg(long, default_value = "default")]
        strategy: String,
        /// Allow real order placement. Without this flag every order is
        /// simulated, regardless of the config.
        #[arg(long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, strategy, execute } => run(config, strategy, execute).await,
    }
}

/// Console logging by default; when `logging.file` is set, plain-text records
/// go to that file instead.
fn init_tracing(logging: &config::LoggingConfig) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()))
    };

    if logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
        return Ok(());
    }

    let path = PathBuf::from(&logging.file);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

async fn run(config_path: PathBuf, strategy: String, execute: bool) -> ExitCode {
    // ── 1. Config (fatal on failure) ─────────────────────────────────────
    let mut config = match BotConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e:#}");
            return ExitCode::from(1);
        }
    };
    config.apply_env_overrides();

    // ── 2. Logging ───────────────────────────────────────────────────────
    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::from(1);
    }

    if let Err(e) = config.validate() {
        eprintln!("invalid config: {e}");
        return ExitCode::from(1);
    }

    // Without --execute everything is simulated, whatever the config says.
    let dry_run = !execute || config.trading.mode.dry_run;

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Orion Futures Nexus — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!(
        symbols = ?config.trading.symbols,
        timeframes = ?config.trading.timeframes,
        strategy = %strategy,
        testnet = config.apis.exchange.testnet,
        dry_run,
        "configuration active"
    );
    if dry_run {
        warn!("dry-run mode — no order will reach the exchange");
    }

    // ── 3. Composition root ──────────────────────────────────────────────
    let audit = match AuditLog::new(&config.logging.audit_dir) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            eprintln!("failed to initialise audit streams: {e:#}");
            return ExitCode::from(1);
        }
    };

    let client = Arc::new(BinanceFuturesClient::new(&config.apis.exchange, audit.clone()));
    let state = Arc::new(BotState::new(strategy, dry_run));

    // ── 4. Status API (read-only, best effort) ───────────────────────────
    let api_state = state.clone();
    let bind_addr = config.runtime.bind_addr.clone();
    tokio::spawn(async move {
        status::serve(api_state, bind_addr).await;
    });

    // ── 5. Shutdown signal ───────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let signalled = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let signalled = signalled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown signal received — the current cycle will complete first");
                signalled.store(true, std::sync::atomic::Ordering::SeqCst);
                let _ = shutdown_tx.send(true);
            }
        });
    }

    // ── 6. Run the scheduler ─────────────────────────────────────────────
    let scheduler = TradingScheduler::new(config, client, audit.clone(), state, dry_run);
    scheduler.run(shutdown_rx).await;

    audit.log_history("session end", "scheduler stopped, resources released");
    info!("Orion Futures Nexus shut down complete.");

    if signalled.load(std::sync::atomic::Ordering::SeqCst) {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    }
}
