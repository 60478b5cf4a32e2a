//! Arbitrage scheduler
//! Mission: poll both venues, evaluate the spread, execute at most one trade at a time
//! Philosophy: abandon cycles freely, never abandon an in-flight trade

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::arb::comparator::{ArbDirection, ArbitrageOpportunity, QuoteComparator};
use crate::config::ArbConfig;
use crate::curve::CurveLedger;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::market::{ExternalMarket, ExternalQuote, SwapDirection};
use crate::math::{self, Rounding};

/// Where the scheduler is inside a cycle. `Executing` is the only phase a
/// stop request will not interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Polling,
    Evaluating,
    Executing,
}

/// How a single cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Both legs filled.
    Executed { direction: ArbDirection },
    /// An opportunity qualified but dry-run mode kept it on paper.
    DryRun { direction: ArbDirection },
    /// Prices compared, nothing cleared the threshold.
    NoOpportunity,
    /// The cycle ended before any leg filled. State is untouched.
    Abandoned { reason: String },
    /// The first leg filled and the second failed. Inventory is unbalanced
    /// and stays that way until an operator intervenes.
    PartialFailure { reason: String },
}

#[derive(Default)]
struct Diagnostics {
    cycles_completed: AtomicU64,
    cycles_abandoned: AtomicU64,
    opportunities_found: AtomicU64,
    opportunities_skipped: AtomicU64,
    trades_executed: AtomicU64,
    partial_failures: AtomicU64,
    total_estimated_profit: Mutex<u128>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub cycles_completed: u64,
    pub cycles_abandoned: u64,
    pub opportunities_found: u64,
    pub opportunities_skipped: u64,
    pub trades_executed: u64,
    pub partial_failures: u64,
    /// Sum of comparator estimates for executed trades, quote smallest units.
    pub total_estimated_profit: u128,
}

/// Polls the curve against the external venue on a fixed interval and
/// executes qualifying spreads leg by leg.
pub struct ArbitrageScheduler {
    cfg: ArbConfig,
    ledger: Arc<CurveLedger>,
    market: Arc<dyn ExternalMarket>,
    comparator: QuoteComparator,
    events: broadcast::Sender<EngineEvent>,
    phase: RwLock<SchedulerPhase>,
    running: AtomicBool,
    consecutive_failures: AtomicU32,
    diagnostics: Diagnostics,
}

impl ArbitrageScheduler {
    pub fn new(
        cfg: ArbConfig,
        ledger: Arc<CurveLedger>,
        market: Arc<dyn ExternalMarket>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let comparator = QuoteComparator::new(
            ledger.fee_bps(),
            cfg.external_fee_bps,
            cfg.min_profit_threshold,
            ledger.decimals_factor(),
        );
        Self {
            cfg,
            ledger,
            market,
            comparator,
            events,
            phase: RwLock::new(SchedulerPhase::Idle),
            running: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        *self.phase.write() = phase;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests a stop. Honored between cycles; an in-flight trade always
    /// runs to completion first.
    pub fn stop(&self) {
        info!("🛑 scheduler stop requested, finishing current cycle");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            cycles_completed: self.diagnostics.cycles_completed.load(Ordering::Relaxed),
            cycles_abandoned: self.diagnostics.cycles_abandoned.load(Ordering::Relaxed),
            opportunities_found: self.diagnostics.opportunities_found.load(Ordering::Relaxed),
            opportunities_skipped: self
                .diagnostics
                .opportunities_skipped
                .load(Ordering::Relaxed),
            trades_executed: self.diagnostics.trades_executed.load(Ordering::Relaxed),
            partial_failures: self.diagnostics.partial_failures.load(Ordering::Relaxed),
            total_estimated_profit: *self.diagnostics.total_estimated_profit.lock(),
        }
    }

    /// Main loop. Ticks on the poll interval, skips missed ticks instead of
    /// bursting, and exits on stop, on a partial failure (when configured to
    /// halt), or after too many consecutive failed cycles.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.cfg.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            poll_interval_ms = self.cfg.poll_interval_ms,
            trade_size = self.cfg.trade_size,
            min_profit_threshold = self.cfg.min_profit_threshold,
            dry_run = self.cfg.dry_run,
            "🚀 arbitrage scheduler started"
        );

        let mut cycles: u64 = 0;
        loop {
            ticker.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let outcome = self.run_once().await;
            cycles += 1;

            match &outcome {
                CycleOutcome::PartialFailure { reason } => {
                    if self.cfg.halt_on_partial_failure {
                        error!(%reason, "halting after partial arbitrage failure");
                        self.running.store(false, Ordering::SeqCst);
                    }
                }
                CycleOutcome::Abandoned { .. } => {
                    let streak = self.consecutive_failures.load(Ordering::SeqCst);
                    if self.cfg.max_consecutive_failures > 0
                        && streak >= self.cfg.max_consecutive_failures
                    {
                        error!(streak, "too many consecutive failed cycles, stopping");
                        self.running.store(false, Ordering::SeqCst);
                    }
                }
                _ => {}
            }

            if self.cfg.summary_every_cycles > 0 && cycles % self.cfg.summary_every_cycles == 0 {
                let snapshot = self.diagnostics();
                info!(
                    cycles_completed = snapshot.cycles_completed,
                    cycles_abandoned = snapshot.cycles_abandoned,
                    opportunities_found = snapshot.opportunities_found,
                    trades_executed = snapshot.trades_executed,
                    total_estimated_profit = snapshot.total_estimated_profit,
                    "scheduler summary"
                );
            }
        }

        let snapshot = self.diagnostics();
        info!(
            cycles_completed = snapshot.cycles_completed,
            cycles_abandoned = snapshot.cycles_abandoned,
            trades_executed = snapshot.trades_executed,
            partial_failures = snapshot.partial_failures,
            total_estimated_profit = snapshot.total_estimated_profit,
            "🛑 arbitrage scheduler stopped"
        );
    }

    /// One full cycle, always parking the phase back at `Idle`.
    pub async fn run_once(&self) -> CycleOutcome {
        let outcome = self.cycle().await;
        self.set_phase(SchedulerPhase::Idle);
        self.record(&outcome);
        outcome
    }

    fn record(&self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Executed { .. } => {
                self.diagnostics
                    .cycles_completed
                    .fetch_add(1, Ordering::Relaxed);
                self.diagnostics
                    .trades_executed
                    .fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CycleOutcome::DryRun { .. } | CycleOutcome::NoOpportunity => {
                self.diagnostics
                    .cycles_completed
                    .fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CycleOutcome::Abandoned { .. } => {
                self.diagnostics
                    .cycles_abandoned
                    .fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
            }
            CycleOutcome::PartialFailure { .. } => {
                self.diagnostics
                    .partial_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn abandon(&self, reason: String) -> CycleOutcome {
        warn!(%reason, "cycle abandoned");
        let _ = self.events.send(EngineEvent::CycleFailed {
            reason: reason.clone(),
        });
        CycleOutcome::Abandoned { reason }
    }

    async fn cycle(&self) -> CycleOutcome {
        self.set_phase(SchedulerPhase::Polling);

        let curve_price = match self.ledger.spot_price() {
            Ok(price) => price,
            Err(e) => return self.abandon(format!("curve spot price unavailable: {e}")),
        };

        let timeout = Duration::from_millis(self.cfg.call_timeout_ms);
        let external =
            match tokio::time::timeout(timeout, self.market.quote(self.cfg.trade_size)).await {
                Ok(Ok(quote)) => quote,
                Ok(Err(e)) => {
                    if !e.is_transient() {
                        error!(error = %e, "non-transient failure while polling the venue");
                    }
                    return self.abandon(format!("external quote failed: {e}"));
                }
                Err(_) => {
                    return self.abandon(format!(
                        "external quote timed out after {}ms",
                        self.cfg.call_timeout_ms
                    ))
                }
            };

        // A quote the venue stamped in the past is as useless as no quote.
        let age_ms = Utc::now()
            .signed_duration_since(external.as_of)
            .num_milliseconds();
        if self.cfg.max_quote_age_ms > 0 && age_ms > self.cfg.max_quote_age_ms as i64 {
            return self.abandon(format!("external quote is {age_ms}ms old"));
        }
        if external.max_tradable_amount < self.cfg.trade_size {
            return self.abandon(format!(
                "venue depth {} below trade size {}",
                external.max_tradable_amount, self.cfg.trade_size
            ));
        }

        self.set_phase(SchedulerPhase::Evaluating);
        debug!(
            curve_price,
            external_price = external.price,
            trade_size = self.cfg.trade_size,
            "evaluating spread"
        );

        let opportunity =
            match self
                .comparator
                .compare(curve_price, &external, self.cfg.trade_size)
            {
                Ok(Some(opportunity)) => opportunity,
                Ok(None) => {
                    self.diagnostics
                        .opportunities_skipped
                        .fetch_add(1, Ordering::Relaxed);
                    let _ = self.events.send(EngineEvent::OpportunitySkipped {
                        curve_price,
                        external_price: external.price,
                    });
                    return CycleOutcome::NoOpportunity;
                }
                Err(e) => return self.abandon(format!("spread comparison failed: {e}")),
            };

        self.diagnostics
            .opportunities_found
            .fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(EngineEvent::OpportunityFound {
            direction: opportunity.direction,
            estimated_profit: opportunity.estimated_profit,
            trade_size: opportunity.trade_size,
        });

        if self.cfg.dry_run {
            info!(
                direction = ?opportunity.direction,
                estimated_profit = opportunity.estimated_profit,
                "dry run, trade stays on paper"
            );
            return CycleOutcome::DryRun {
                direction: opportunity.direction,
            };
        }

        self.set_phase(SchedulerPhase::Executing);
        match self.execute(&opportunity, &external).await {
            Ok(()) => {
                let mut total = self.diagnostics.total_estimated_profit.lock();
                *total = total.saturating_add(opportunity.estimated_profit);
                drop(total);
                CycleOutcome::Executed {
                    direction: opportunity.direction,
                }
            }
            Err(EngineError::PartialArbitrageFailure { first_leg, source }) => {
                let reason = source.to_string();
                let _ = self.events.send(EngineEvent::PartialArbitrageFailure {
                    direction: opportunity.direction,
                    first_leg: first_leg.clone(),
                    reason: reason.clone(),
                });
                CycleOutcome::PartialFailure {
                    reason: format!("first leg {first_leg} filled, second leg failed: {reason}"),
                }
            }
            Err(e) => self.abandon(format!("execution failed before any fill: {e}")),
        }
    }

    /// Runs both legs sequentially. An error from the first leg propagates
    /// as-is (nothing filled); an error after the first leg filled is wrapped
    /// in `PartialArbitrageFailure` and never auto-unwound.
    async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
        external: &ExternalQuote,
    ) -> Result<()> {
        let deadline = Utc::now() + chrono::Duration::milliseconds(self.cfg.call_timeout_ms as i64);
        let timeout = Duration::from_millis(self.cfg.call_timeout_ms);
        let factor = self.ledger.decimals_factor();
        let size = opportunity.trade_size;
        let slippage_floor = |amount: u128| -> Result<u128> {
            let tolerance = math::bps_of(amount, self.cfg.max_slippage_bps)?;
            Ok(amount.saturating_sub(tolerance))
        };

        match opportunity.direction {
            ArbDirection::BuyCurveSellExternal => {
                // Leg 1: mint from the curve.
                let quote_in = self.ledger.required_quote_for_buy(size)?;
                let min_tokens = slippage_floor(size)?;
                let trade = self.ledger.buy(quote_in, min_tokens)?;
                debug!(
                    trade_id = %trade.id,
                    token_amount = trade.token_amount,
                    "first leg filled on curve"
                );

                // Leg 2: unload on the venue.
                let second_leg = async {
                    let notional =
                        math::mul_div(external.price, trade.token_amount, factor, Rounding::Down)?;
                    let after_fee =
                        notional.saturating_sub(math::bps_of(notional, self.cfg.external_fee_bps)?);
                    let min_out = slippage_floor(after_fee)?;
                    match tokio::time::timeout(
                        timeout,
                        self.market.swap(
                            SwapDirection::TokenToQuote,
                            trade.token_amount,
                            min_out,
                            deadline,
                        ),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::ExternalTradeFailed {
                            reason: format!(
                                "venue swap timed out after {}ms",
                                self.cfg.call_timeout_ms
                            ),
                        }),
                    }
                };
                match second_leg.await {
                    Ok(receipt) => {
                        info!(
                            reference = %receipt.reference,
                            amount_out = receipt.amount_out,
                            "second leg filled on venue"
                        );
                        Ok(())
                    }
                    Err(e) => Err(EngineError::PartialArbitrageFailure {
                        first_leg: trade.id.to_string(),
                        source: Box::new(e),
                    }),
                }
            }
            ArbDirection::BuyExternalSellCurve => {
                // Leg 1: buy on the venue. Gross up the notional so the
                // venue's fee still leaves enough to cover the tokens.
                let cost = math::mul_div(external.price, size, factor, Rounding::Up)?;
                let amount_in = math::mul_div(
                    cost,
                    math::BPS_DENOMINATOR,
                    math::BPS_DENOMINATOR.saturating_sub(u128::from(self.cfg.external_fee_bps)),
                    Rounding::Up,
                )?;
                let min_tokens = slippage_floor(size)?;
                let receipt = match tokio::time::timeout(
                    timeout,
                    self.market
                        .swap(SwapDirection::QuoteToToken, amount_in, min_tokens, deadline),
                )
                .await
                {
                    Ok(Ok(receipt)) => receipt,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(EngineError::ExternalTradeFailed {
                            reason: format!(
                                "venue swap timed out after {}ms",
                                self.cfg.call_timeout_ms
                            ),
                        })
                    }
                };
                debug!(
                    reference = %receipt.reference,
                    amount_out = receipt.amount_out,
                    "first leg filled on venue"
                );

                // Leg 2: sell the delivered tokens into the curve.
                let second_leg = || -> Result<()> {
                    let preview = self.ledger.preview_sell(receipt.amount_out)?;
                    let min_out = slippage_floor(preview.output_amount)?;
                    let trade = self.ledger.sell(receipt.amount_out, min_out)?;
                    debug!(
                        trade_id = %trade.id,
                        quote_out = trade.quote_asset_amount,
                        "second leg filled on curve"
                    );
                    Ok(())
                };
                second_leg().map_err(|e| EngineError::PartialArbitrageFailure {
                    first_leg: receipt.reference.clone(),
                    source: Box::new(e),
                })
            }
        }
    }
}
