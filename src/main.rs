//! Curvebot - Bonding-Curve Market Maker & Cross-Market Arbitrage Engine
//! Mission: quote the curve, watch the venue, take the spread when it pays
//! Philosophy: integer math end to end, one trade in flight, fail loud and typed

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curvebot::arb::ArbitrageScheduler;
use curvebot::config::{EngineConfig, VenueKind};
use curvebot::curve::CurveLedger;
use curvebot::events::{run_event_logger, EngineEvent};
use curvebot::market::{
    ExternalMarket, PaperMarket, PaperMarketConfig, PaperToken, RestMarket, RestMarketConfig,
};

#[derive(Parser, Debug)]
#[command(name = "curvebot")]
#[command(about = "Bonding-curve market maker with a cross-market arbitrage loop")]
struct Args {
    /// Force the paper venue regardless of VENUE
    #[arg(long)]
    paper: bool,

    /// Evaluate opportunities without sending either leg
    #[arg(long)]
    dry_run: bool,

    /// Override the poll interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Load environment from this file instead of ./.env
    #[arg(long)]
    env_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    load_env(args.env_file.as_deref());
    init_tracing();

    info!("🚀 Curvebot starting");

    let mut cfg = EngineConfig::from_env();
    if args.paper {
        cfg.market.venue = VenueKind::Paper;
    }
    if args.dry_run {
        cfg.arb.dry_run = true;
    }
    if let Some(poll_ms) = args.poll_ms {
        cfg.arb.poll_interval_ms = poll_ms;
    }
    cfg.validate().context("configuration rejected")?;

    info!(
        venue = ?cfg.market.venue,
        token_decimals = cfg.market.token_decimals,
        trade_size = cfg.arb.trade_size,
        min_profit_threshold = cfg.arb.min_profit_threshold,
        poll_interval_ms = cfg.arb.poll_interval_ms,
        dry_run = cfg.arb.dry_run,
        "configuration loaded"
    );

    let (events, events_rx) = broadcast::channel::<EngineEvent>(1024);
    let logger = tokio::spawn(run_event_logger(events_rx));

    let token = PaperToken::new(cfg.market.token_decimals);
    let ledger = Arc::new(CurveLedger::new(
        cfg.curve.to_parameters(),
        &token,
        cfg.curve.initial_supply,
        events.clone(),
    )?);

    let market: Arc<dyn ExternalMarket> = match cfg.market.venue {
        VenueKind::Paper => {
            let mut paper_cfg = PaperMarketConfig::from_env();
            paper_cfg.token_decimals = cfg.market.token_decimals;
            let paper = PaperMarket::new(paper_cfg)?;
            info!(price = paper.price(), "📝 paper venue ready");
            Arc::new(paper)
        }
        VenueKind::Rest => Arc::new(RestMarket::new(RestMarketConfig {
            base_url: cfg.market.rest_base_url.clone(),
            api_key: cfg.market.rest_api_key.clone(),
            http_timeout_ms: cfg.market.http_timeout_ms,
        })?),
    };

    let scheduler = Arc::new(ArbitrageScheduler::new(
        cfg.arb.clone(),
        ledger.clone(),
        market,
        events.clone(),
    ));
    let mut runner = tokio::spawn(scheduler.clone().run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 interrupt received, stopping scheduler");
            scheduler.stop();
            let _ = (&mut runner).await;
        }
        result = &mut runner => {
            warn!("scheduler exited on its own");
            let _ = result;
        }
    }

    if let Ok(snapshot) = ledger.snapshot() {
        info!(
            circulating_supply = snapshot.circulating_supply,
            spot_price = snapshot.spot_price,
            reserve_balance = snapshot.reserve_balance,
            fees_accrued = snapshot.fees_accrued,
            trade_count = snapshot.trade_count,
            "final ledger"
        );
    }

    drop(events);
    let _ = logger.await;
    Ok(())
}

fn load_env(explicit: Option<&str>) {
    if let Some(path) = explicit {
        if dotenv::from_path(path).is_err() {
            eprintln!("warning: could not load env file {path}");
        }
        return;
    }
    // Standard dotenv search: cwd and parents.
    let _ = dotenv();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curvebot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
