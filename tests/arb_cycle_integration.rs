//! Integration tests for the full engine wiring
//!
//! These tests assemble the same pieces the binary does (config, paper
//! token, curve ledger, external venue, scheduler, event bus) and drive
//! whole arbitrage cycles through the public API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use curvebot::arb::{ArbDirection, ArbitrageScheduler, CycleOutcome};
use curvebot::config::EngineConfig;
use curvebot::curve::CurveLedger;
use curvebot::events::EngineEvent;
use curvebot::market::{
    ExternalMarket, ExternalQuote, PaperMarket, PaperMarketConfig, PaperToken, SwapDirection,
    SwapReceipt, Token, ENGINE_ACCOUNT,
};
use curvebot::EngineError;

const ONE_TOKEN: u128 = 1_000_000_000;

/// Engine wiring shared by the tests: default curve, paper token, paper
/// venue parked at `venue_price`, fast polling.
struct Harness {
    scheduler: Arc<ArbitrageScheduler>,
    ledger: Arc<CurveLedger>,
    events: broadcast::Sender<EngineEvent>,
    initial_supply: u128,
}

fn build_harness(venue_price: u128) -> Harness {
    let mut cfg = EngineConfig::default();
    cfg.arb.poll_interval_ms = 10;
    cfg.arb.call_timeout_ms = 500;
    cfg.validate().expect("default configuration must validate");

    let market = PaperMarket::new(PaperMarketConfig {
        initial_price: venue_price,
        ..PaperMarketConfig::default()
    })
    .expect("paper venue should build");

    build_harness_with(cfg, Arc::new(market))
}

fn build_harness_with(cfg: EngineConfig, market: Arc<dyn ExternalMarket>) -> Harness {
    let (events, _rx) = broadcast::channel(256);
    let token = PaperToken::new(cfg.market.token_decimals);
    let ledger = Arc::new(
        CurveLedger::new(
            cfg.curve.to_parameters(),
            &token,
            cfg.curve.initial_supply,
            events.clone(),
        )
        .expect("ledger should build from a validated config"),
    );
    let scheduler = Arc::new(ArbitrageScheduler::new(
        cfg.arb.clone(),
        ledger.clone(),
        market,
        events.clone(),
    ));
    Harness {
        scheduler,
        ledger,
        events,
        initial_supply: cfg.curve.initial_supply,
    }
}

/// Venue whose quotes are fine but whose swaps always bounce. Used to force
/// the second leg of a buy-curve-sell-external cycle to fail.
struct RejectingVenue {
    price: u128,
}

#[async_trait::async_trait]
impl ExternalMarket for RejectingVenue {
    async fn quote(&self, _token_amount: u128) -> curvebot::Result<ExternalQuote> {
        Ok(ExternalQuote {
            price: self.price,
            max_tradable_amount: u128::MAX,
            as_of: Utc::now(),
        })
    }

    async fn swap(
        &self,
        _direction: SwapDirection,
        _amount_in: u128,
        _min_amount_out: u128,
        _deadline: DateTime<Utc>,
    ) -> curvebot::Result<SwapReceipt> {
        Err(EngineError::ExternalTradeFailed {
            reason: "venue rejected the order".into(),
        })
    }
}

#[tokio::test]
async fn cheap_venue_cycle_moves_tokens_into_the_curve() {
    // Default curve spot at one million tokens of circulating supply sits
    // near 8.9; a venue at 8.0 makes buy-external-sell-curve profitable.
    let harness = build_harness(8_000_000_000);
    let mut rx = harness.events.subscribe();

    let outcome = harness.scheduler.run_once().await;
    assert_eq!(
        outcome,
        CycleOutcome::Executed {
            direction: ArbDirection::BuyExternalSellCurve
        },
        "spread should execute"
    );

    // The venue-bought tokens were sold into the curve.
    assert_eq!(
        harness.ledger.circulating_supply(),
        harness.initial_supply - ONE_TOKEN
    );
    let snapshot = harness.ledger.snapshot().expect("snapshot should price");
    assert_eq!(snapshot.trade_count, 1);
    assert!(snapshot.fees_accrued > 0, "curve fee should accrue");

    let mut saw_opportunity = false;
    let mut saw_trade = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::OpportunityFound { direction, .. } => {
                assert_eq!(direction, ArbDirection::BuyExternalSellCurve);
                saw_opportunity = true;
            }
            EngineEvent::TradeExecuted { .. } => saw_trade = true,
            _ => {}
        }
    }
    assert!(saw_opportunity, "opportunity event should be on the bus");
    assert!(saw_trade, "ledger trade event should be on the bus");
}

#[tokio::test]
async fn rich_venue_cycle_mints_from_the_curve() {
    let harness = build_harness(10_000_000_000);

    let outcome = harness.scheduler.run_once().await;
    assert_eq!(
        outcome,
        CycleOutcome::Executed {
            direction: ArbDirection::BuyCurveSellExternal
        }
    );
    assert!(
        harness.ledger.circulating_supply() >= harness.initial_supply + ONE_TOKEN,
        "curve should have minted at least the trade size"
    );
}

#[tokio::test]
async fn flat_market_skips_and_leaves_the_ledger_alone() {
    let mut cfg = EngineConfig::default();
    cfg.arb.poll_interval_ms = 10;
    let (events, _rx) = broadcast::channel(16);
    let token = PaperToken::new(cfg.market.token_decimals);
    let ledger = Arc::new(
        CurveLedger::new(
            cfg.curve.to_parameters(),
            &token,
            cfg.curve.initial_supply,
            events.clone(),
        )
        .unwrap(),
    );
    // Park the venue exactly on the curve's spot price.
    let market = PaperMarket::new(PaperMarketConfig {
        initial_price: ledger.spot_price().unwrap(),
        ..PaperMarketConfig::default()
    })
    .unwrap();
    let scheduler = Arc::new(ArbitrageScheduler::new(
        cfg.arb.clone(),
        ledger.clone(),
        Arc::new(market),
        events,
    ));

    assert_eq!(scheduler.run_once().await, CycleOutcome::NoOpportunity);
    assert_eq!(ledger.circulating_supply(), cfg.curve.initial_supply);
    assert_eq!(ledger.snapshot().unwrap().trade_count, 0);
}

#[tokio::test]
async fn partial_failure_halts_the_run_loop_without_unwinding() {
    let harness = build_harness_with(
        {
            let mut cfg = EngineConfig::default();
            cfg.arb.poll_interval_ms = 10;
            cfg.arb.call_timeout_ms = 500;
            cfg
        },
        Arc::new(RejectingVenue {
            price: 10_000_000_000,
        }),
    );

    let handle = tokio::spawn(harness.scheduler.clone().run());
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler should halt itself after the partial failure")
        .unwrap();

    assert!(!harness.scheduler.is_running());
    assert_eq!(harness.scheduler.diagnostics().partial_failures, 1);
    // The curve leg filled and was never unwound.
    assert!(harness.ledger.circulating_supply() > harness.initial_supply);
    assert_eq!(harness.ledger.snapshot().unwrap().trade_count, 1);
}

#[tokio::test]
async fn stop_request_ends_the_loop_between_cycles() {
    let harness = build_harness(8_000_000_000);

    let handle = tokio::spawn(harness.scheduler.clone().run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.scheduler.stop();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler should stop at the next idle boundary")
        .unwrap();

    assert!(!harness.scheduler.is_running());
    assert!(harness.scheduler.diagnostics().trades_executed >= 1);
}

#[tokio::test]
async fn paper_token_moves_balances_like_a_real_one() {
    let token = PaperToken::new(9);
    token.mint("alice", 5 * ONE_TOKEN);

    assert_eq!(token.decimals(), 9);
    assert_eq!(token.balance_of("alice").await.unwrap(), 5 * ONE_TOKEN);

    token
        .transfer_from("alice", "bob", 2 * ONE_TOKEN)
        .await
        .unwrap();
    assert_eq!(token.balance_of("alice").await.unwrap(), 3 * ONE_TOKEN);
    assert_eq!(token.balance_of("bob").await.unwrap(), 2 * ONE_TOKEN);

    // `transfer` spends from the engine's own account.
    token.mint(ENGINE_ACCOUNT, ONE_TOKEN);
    token.transfer("bob", ONE_TOKEN).await.unwrap();
    assert_eq!(token.balance_of("bob").await.unwrap(), 3 * ONE_TOKEN);

    let err = token
        .transfer_from("alice", "bob", 100 * ONE_TOKEN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExternalTradeFailed { .. }));
}
