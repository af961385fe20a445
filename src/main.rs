// =============================================================================
// Regime Replay -- Main Entry Point
// =============================================================================
//
// Replays a JSON-lines bar file through the signal router against the paper
// broker and prints one JSON line per bar with the target allocations.
//
//   REGIME_CONFIG   path of a RuntimeConfig JSON file (optional)
//   REGIME_PRESET   preset used when no config file loads (entropy_regime)
//   REGIME_BARS     JSON-lines bar file, one `Bar` per line (required)
//   REGIME_EQUITY   initial equity (100000)
// =============================================================================

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use regime_allocator::paper::PaperBroker;
use regime_allocator::types::{Bar, BarSlice};
use regime_allocator::{RuntimeConfig, SignalRouter};

#[derive(Debug, Default)]
struct ReplayStats {
    bars: u64,
    slices: u64,
    orders: u64,
    risk_events: u64,
    reconcile_alerts: u64,
    skipped_lines: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Regime Replay -- Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let preset = std::env::var("REGIME_PRESET").unwrap_or_else(|_| "entropy_regime".into());
    let config_path = std::env::var("REGIME_CONFIG").ok().map(PathBuf::from);

    let config = match &config_path {
        Some(path) => RuntimeConfig::load(path).or_else(|e| {
            warn!(error = %e, preset = %preset, "Failed to load config, using preset");
            RuntimeConfig::preset(&preset)
        })?,
        None => RuntimeConfig::preset(&preset)?,
    };

    let equity: f64 = match std::env::var("REGIME_EQUITY") {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("REGIME_EQUITY is not a number: {v}"))?,
        Err(_) => 100_000.0,
    };
    let bars_path = std::env::var("REGIME_BARS").context("REGIME_BARS must point to a JSON-lines bar file")?;

    // ── 2. Router & paper broker ─────────────────────────────────────────
    let mut router = SignalRouter::new(&config, equity).context("invalid strategy configuration")?;
    let mut broker = PaperBroker::new(equity);

    info!(
        strategy = %router.strategy(),
        symbols = ?router.symbols(),
        equity = format!("{:.2}", equity),
        bars = %bars_path,
        "Replay configured"
    );

    // ── 3. Replay, interruptible by Ctrl+C ───────────────────────────────
    let mut stats = ReplayStats::default();
    tokio::select! {
        res = replay(&bars_path, &mut router, &mut broker, &mut stats) => {
            if let Err(e) = res {
                error!(error = %e, "Replay aborted");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received, stopping replay");
        }
    }

    // ── 4. Summary ───────────────────────────────────────────────────────
    let portfolio = router.portfolio();
    info!(
        strategy = %router.strategy(),
        bars = stats.bars,
        slices = stats.slices,
        orders = stats.orders,
        fills = broker.fill_count(),
        risk_events = stats.risk_events,
        reconcile_alerts = stats.reconcile_alerts,
        skipped_lines = stats.skipped_lines,
        open_positions = router.positions().len(),
        final_equity = format!("{:.2}", broker.equity()),
        peak_equity = format!("{:.2}", portfolio.peak_equity),
        drawdown = format!("{:.4}", portfolio.drawdown),
        telemetry_records = router.telemetry().len(),
        "Replay complete"
    );

    if let Some(path) = config_path.filter(|p| !p.exists()) {
        if let Err(e) = config.save(&path) {
            error!(error = %e, "Failed to save runtime config");
        }
    }
    Ok(())
}

/// Stream bars, group them by timestamp and drive router and broker.
async fn replay(
    path: &str,
    router: &mut SignalRouter,
    broker: &mut PaperBroker,
    stats: &mut ReplayStats,
) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open bar file {path}"))?;
    let mut lines = BufReader::new(file).lines();
    let mut pending: Option<BarSlice> = None;
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("failed to read bar file")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let bar: Bar = match serde_json::from_str(&line) {
            Ok(bar) => bar,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed bar");
                stats.skipped_lines += 1;
                continue;
            }
        };
        stats.bars += 1;

        match pending.as_mut() {
            Some(slice) if slice.timestamp == bar.timestamp => slice.insert(bar),
            _ => {
                let mut next = BarSlice::new(bar.timestamp);
                next.insert(bar);
                if let Some(done) = pending.replace(next) {
                    step(&done, router, broker, stats).await?;
                }
            }
        }
    }
    if let Some(done) = pending {
        step(&done, router, broker, stats).await?;
    }
    Ok(())
}

async fn step(
    slice: &BarSlice,
    router: &mut SignalRouter,
    broker: &mut PaperBroker,
    stats: &mut ReplayStats,
) -> anyhow::Result<()> {
    let equity = broker.mark(slice);
    let out = router.process_bar_concurrent(slice, equity).await;

    stats.slices += 1;
    stats.orders += out.orders.len() as u64;
    stats.risk_events += out.risk_events.len() as u64;
    stats.reconcile_alerts += out.reconcile_alerts.len() as u64;

    let line = serde_json::json!({
        "timestamp": out.timestamp,
        "equity": equity,
        "drawdown": out.drawdown,
        "breaker_tripped": out.breaker_tripped,
        "allocations": out.allocations,
        "orders": out.orders,
    });
    println!("{}", serde_json::to_string(&line).context("failed to serialise bar output")?);

    let fills = broker.execute(&out.orders, slice);
    router.apply_fills(&fills);
    Ok(())
}
