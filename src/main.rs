//! Delta Arb - Main Entry Point
//!
//! Paper trading by default; live mode requires venue gateway wiring and is
//! gated behind `LIVE_TRADING=true`.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use delta_arb::config::Config;
use delta_arb::engine::{
    alert_channel, ArbitrageStateMachine, StrategySnapshot,
};
use delta_arb::persistence::{ContextSink, ContextStore};
use delta_arb::risk::HedgeRiskManager;
use delta_arb::signal::{DivergenceDetector, SignalEngine};
use delta_arb::strategy::{ExecutionStrategySelector, OpportunityEvaluator, OrderExecutor};
use delta_arb::venue::{
    BalanceOracle, BookLevel, MarketSnapshot, OrderGateway, PaperVenue, SnapshotSource, Venue,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Delta Arb CLI
#[derive(Parser)]
#[command(name = "delta-arb")]
#[command(version, about = "Delta-neutral cross-venue arbitrage engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the last persisted session status
    Status {
        /// Path to the context database (default: data/context.db)
        #[arg(short, long, default_value = "data/context.db")]
        db: String,

        /// Show positions and recent alerts
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Trading mode: Live (real money) or Paper.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    if let Some(Commands::Status { db, verbose }) = cli.command {
        return show_status(&db, verbose);
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║              Delta Arb v{} - Arbitrage Engine             ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let trading_mode = if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
        warn!("⚠️  LIVE TRADING MODE requested");
        TradingMode::Live
    } else {
        info!("📝 PAPER TRADING MODE - simulated venues");
        TradingMode::Paper
    };

    let config = Config::load()?;
    log_config(&config);

    if trading_mode == TradingMode::Live {
        // Venue gateways (wire protocols, auth, reconnection) are deployed
        // as separate collaborators and wired in at integration time.
        bail!("live mode requires venue gateway wiring; run paper mode instead");
    }

    // Paper venues for all three books.
    let binance = Arc::new(PaperVenue::new(Venue::Binance));
    let kraken = Arc::new(PaperVenue::new(Venue::Kraken));
    let hyperliquid = Arc::new(PaperVenue::new(Venue::Hyperliquid));
    for venue in [&binance, &kraken, &hyperliquid] {
        venue.set_balance("USDT", dec!(10000)).await;
    }

    // Synthetic books: per-venue phase offsets make the feeds drift apart
    // and occasionally cross, which is what the signal engine watches for.
    spawn_paper_feed(binance.clone(), config.symbol.clone(), dec!(50010), 0);
    spawn_paper_feed(kraken.clone(), config.symbol.clone(), dec!(49995), 13);
    spawn_paper_feed(hyperliquid.clone(), config.symbol.clone(), dec!(50000), 27);

    let mut gateways: HashMap<Venue, Arc<dyn OrderGateway>> = HashMap::new();
    gateways.insert(Venue::Binance, binance.clone());
    gateways.insert(Venue::Kraken, kraken.clone());
    gateways.insert(Venue::Hyperliquid, hyperliquid.clone());

    let mut sources: HashMap<Venue, Arc<dyn SnapshotSource>> = HashMap::new();
    sources.insert(Venue::Binance, binance.clone());
    sources.insert(Venue::Kraken, kraken.clone());
    sources.insert(Venue::Hyperliquid, hyperliquid.clone());

    let mut oracles: HashMap<Venue, Arc<dyn BalanceOracle>> = HashMap::new();
    oracles.insert(Venue::Binance, binance.clone());
    oracles.insert(Venue::Kraken, kraken.clone());
    oracles.insert(Venue::Hyperliquid, hyperliquid);

    let store = Arc::new(ContextStore::new(&config.persistence.db_path)?);

    let (alerts, mut alert_rx) = alert_channel(256);

    // Alert sink: everything the core raises gets logged and persisted.
    let alert_store = store.clone();
    tokio::spawn(async move {
        while let Ok(event) = alert_rx.recv().await {
            info!(alert = ?event, "🔔 Alert");
            if let Err(e) = alert_store.persist_alert(&event) {
                warn!(error = %e, "Failed to persist alert");
            }
        }
    });

    // Construct the components independently and inject them; the machine
    // has no hidden construction side effects.
    let risk = Arc::new(HedgeRiskManager::new(
        config.hedge.clone(),
        &config.symbol,
        gateways.clone(),
        alerts.clone(),
    ));
    let executor = OrderExecutor::new(config.execution.clone(), gateways);

    let mut machine = ArbitrageStateMachine::new(
        config.clone(),
        SignalEngine::new(config.signal.clone()),
        DivergenceDetector::new(config.signal.clone()),
        OpportunityEvaluator::new(config.opportunity.clone()),
        ExecutionStrategySelector::new(config.execution.clone()),
        executor,
        risk,
        sources,
        oracles,
        store,
        alerts,
    );

    let shutdown = machine.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown.request();
    });

    info!("🚀 Starting arbitrage state machine...");
    machine.run().await
}

/// Deterministic synthetic order books for paper trading: a slow triangular
/// oscillation around `base` with size waves that shift the book imbalance.
fn spawn_paper_feed(venue: Arc<PaperVenue>, symbol: String, base: Decimal, phase: i64) {
    let id = venue.venue_id();
    tokio::spawn(async move {
        let mut sequence: u64 = 1;
        let mut tick: i64 = phase;
        loop {
            let cycle = (tick % 40 - 20).abs() - 10; // -10..=10 triangle
            let mid = base + Decimal::from(cycle) * base * dec!(0.000002);
            let half_spread = base * dec!(0.0001);

            let bid_size = Decimal::from(60 + (tick * 7) % 40);
            let ask_size = Decimal::from(60 + (tick * 11 + 17) % 40);

            let snapshot = MarketSnapshot {
                venue: id,
                symbol: symbol.clone(),
                sequence,
                captured_at: chrono::Utc::now(),
                bids: vec![
                    BookLevel::new(mid - half_spread, bid_size),
                    BookLevel::new(mid - half_spread * dec!(3), bid_size * dec!(2)),
                ],
                asks: vec![
                    BookLevel::new(mid + half_spread, ask_size),
                    BookLevel::new(mid + half_spread * dec!(3), ask_size * dec!(2)),
                ],
            };
            venue.push_snapshot(snapshot).await;

            sequence += 1;
            tick += 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });
}

/// Read the persisted context store and print a session summary.
fn show_status(db: &str, verbose: bool) -> Result<()> {
    let store = ContextStore::new(db)?;
    let Some(context) = store.load_latest_context()? else {
        println!("No persisted session context found in {db}");
        return Ok(());
    };

    let snapshot = StrategySnapshot::from(&context);
    println!("Session status ({})", snapshot.symbol);
    println!("  State:            {}", snapshot.state);
    println!("  Total trades:     {}", snapshot.total_trades);
    println!("  Realized PnL:     {}", snapshot.realized_pnl);
    println!("  Net delta value:  {}", snapshot.net_delta_value);
    println!("  Uncovered:        {}", snapshot.uncovered_exposure);
    println!("  Open tickets:     {}", snapshot.open_tickets);
    println!("  Last update:      {}", snapshot.updated_at);

    if verbose {
        if snapshot.positions.is_empty() {
            println!("  Positions:        (flat)");
        } else {
            println!("  Positions:");
            for entry in &snapshot.positions {
                println!(
                    "    {} {} {}",
                    entry.venue.short_code(),
                    entry.symbol,
                    entry.quantity
                );
            }
        }

        let alerts = store.recent_alerts(10)?;
        println!("  Recent alerts:    {}", alerts.len());
        for alert in alerts {
            println!("    {:?}", alert);
        }
    }

    Ok(())
}

fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Symbol: {}", config.symbol);
    info!(
        "   Signal: depth={} divergence_threshold={}",
        config.signal.depth_levels, config.signal.divergence_threshold
    );
    info!(
        "   Opportunity: min_spread={} book_fraction={}",
        config.opportunity.min_spread_after_fees, config.opportunity.max_book_fraction
    );
    info!(
        "   Hedge: tolerance={} max_uncovered={}ms monitor={}ms",
        config.hedge.neutrality_tolerance,
        config.hedge.max_uncovered_time_ms,
        config.hedge.monitor_interval_ms
    );
    debug!(?config, "Full configuration");
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "delta-arb.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("delta_arb=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}
