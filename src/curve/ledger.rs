//! Curve ledger: the single owner of circulating supply
//! Mission: atomic buy/sell against the pricing engine, nothing observes a half-applied trade
//! Philosophy: quote and mutate under one lock, release on every exit path

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::curve::pricing::{CurveParameters, PricingEngine, Quote};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::market::Token;
use crate::math::{self, Rounding};

const RECENT_TRADES_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// Asset selector for the emergency escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Token,
    QuoteAsset,
}

/// A committed state transition. Only constructed by a successful ledger
/// mutation, never standalone.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: Uuid,
    pub direction: TradeDirection,
    /// Quote asset paid in (buy) or paid out (sell), smallest units.
    pub quote_asset_amount: u128,
    /// Tokens received (buy) or surrendered (sell), smallest units.
    pub token_amount: u128,
    pub fee_amount: u128,
    pub supply_before: u128,
    pub supply_after: u128,
    pub executed_at: DateTime<Utc>,
}

/// Mutable curve state. Exclusively owned by the ledger; `circulating_supply`
/// feeds pricing, the rest is bookkeeping that never feeds back into it.
#[derive(Debug)]
struct CurveState {
    circulating_supply: u128,
    reserve_balance: u128,
    fees_accrued: u128,
    total_buy_volume_quote: u128,
    total_sell_volume_quote: u128,
    trade_count: u64,
    recent_trades: VecDeque<Trade>,
}

/// Point-in-time copy of the books for diagnostics and shutdown summaries.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub circulating_supply: u128,
    pub spot_price: u128,
    pub reserve_balance: u128,
    pub fees_accrued: u128,
    pub total_buy_volume_quote: u128,
    pub total_sell_volume_quote: u128,
    pub trade_count: u64,
}

pub struct CurveLedger {
    engine: PricingEngine,
    state: Mutex<CurveState>,
    events: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl CurveLedger {
    /// Builds the ledger. Reads `decimals()` from the token capability exactly
    /// once to derive the cached decimals factor; no per-trade reads after
    /// that. Parameter violations refuse to start.
    pub fn new(
        params: CurveParameters,
        token: &dyn Token,
        initial_supply: u128,
        events: tokio::sync::broadcast::Sender<EngineEvent>,
    ) -> Result<Self> {
        let decimals = token.decimals();
        let decimals_factor = math::decimals_factor(decimals)?;
        let engine = PricingEngine::new(params, decimals_factor)?;

        if initial_supply > engine.params().max_curve_supply {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!(
                    "initial supply {} exceeds max curve supply {}",
                    initial_supply,
                    engine.params().max_curve_supply
                ),
            });
        }

        info!(
            token_decimals = decimals,
            decimals_factor,
            initial_supply,
            max_curve_supply = engine.params().max_curve_supply,
            fee_bps = engine.params().fee_bps,
            "curve ledger initialized"
        );

        Ok(Self {
            engine,
            state: Mutex::new(CurveState {
                circulating_supply: initial_supply,
                reserve_balance: 0,
                fees_accrued: 0,
                total_buy_volume_quote: 0,
                total_sell_volume_quote: 0,
                trade_count: 0,
                recent_trades: VecDeque::with_capacity(RECENT_TRADES_CAP),
            }),
            events,
        })
    }

    pub fn params(&self) -> &CurveParameters {
        self.engine.params()
    }

    pub fn fee_bps(&self) -> u16 {
        self.engine.params().fee_bps
    }

    pub fn decimals_factor(&self) -> u128 {
        self.engine.decimals_factor()
    }

    pub fn circulating_supply(&self) -> u128 {
        self.state.lock().circulating_supply
    }

    /// Unit price at the current supply. Reads a supply snapshot; pricing runs
    /// outside the lock.
    pub fn spot_price(&self) -> Result<u128> {
        let supply = self.circulating_supply();
        self.engine.price_at(supply)
    }

    /// Floor-rounded quote cost of `token_amount` at the current spot price,
    /// through the cached decimals factor.
    pub fn price_for_token_amount(&self, token_amount: u128) -> Result<u128> {
        let spot = self.spot_price()?;
        math::mul_div(
            spot,
            token_amount,
            self.engine.decimals_factor(),
            Rounding::Down,
        )
    }

    /// Ceiling-rounded counterpart: always >= the floor, equal only when the
    /// product divides evenly. Guarantees dust amounts never price at zero
    /// when a minimum non-zero charge must be collected.
    pub fn price_for_token_amount_rounded_up(&self, token_amount: u128) -> Result<u128> {
        let spot = self.spot_price()?;
        math::mul_div(
            spot,
            token_amount,
            self.engine.decimals_factor(),
            Rounding::Up,
        )
    }

    /// Read-only buy quote against a supply snapshot. Does not mutate.
    pub fn preview_buy(&self, quote_in: u128) -> Result<Quote> {
        let supply = self.circulating_supply();
        self.engine.quote_buy(supply, quote_in)
    }

    /// Read-only sell quote against a supply snapshot. Does not mutate.
    pub fn preview_sell(&self, token_in: u128) -> Result<Quote> {
        let supply = self.circulating_supply();
        self.engine.quote_sell(supply, token_in)
    }

    /// Quote input that guarantees a buy of at least `token_amount` tokens at
    /// the current supply: ceiling range cost grossed up for the curve fee.
    pub fn required_quote_for_buy(&self, token_amount: u128) -> Result<u128> {
        let supply = self.circulating_supply();
        let params = self.engine.params();
        let target =
            supply
                .checked_add(token_amount)
                .ok_or(EngineError::ArithmeticOverflow {
                    op: "buy target supply",
                })?;
        if target > params.max_curve_supply {
            return Err(EngineError::SupplyCapExceeded {
                circulating: supply,
                cap: params.max_curve_supply,
            });
        }
        let cost = self.engine.cost_for_range(supply, target, Rounding::Up)?;
        math::mul_div(
            cost,
            math::BPS_DENOMINATOR,
            math::BPS_DENOMINATOR - u128::from(params.fee_bps),
            Rounding::Up,
        )
    }

    /// Buys tokens with `quote_in`, failing with `SlippageExceeded` when the
    /// output falls under `min_token_out`. Quote computation and the supply
    /// mutation are a single critical section; no caller observes an
    /// intermediate supply.
    pub fn buy(&self, quote_in: u128, min_token_out: u128) -> Result<Trade> {
        let params = self.engine.params();
        let mut state = self.state.lock();

        if quote_in < params.min_purchase_quote_amount {
            return Err(EngineError::BelowMinimumPurchase {
                amount: quote_in,
                minimum: params.min_purchase_quote_amount,
            });
        }

        let quote = self.engine.quote_buy(state.circulating_supply, quote_in)?;
        if quote.output_amount < min_token_out {
            return Err(EngineError::SlippageExceeded {
                minimum: min_token_out,
                actual: quote.output_amount,
            });
        }

        let supply_before = state.circulating_supply;
        state.circulating_supply = quote.resulting_supply;
        state.reserve_balance = state
            .reserve_balance
            .saturating_add(quote_in - quote.fee_amount);
        state.fees_accrued = state.fees_accrued.saturating_add(quote.fee_amount);
        state.total_buy_volume_quote = state.total_buy_volume_quote.saturating_add(quote_in);
        state.trade_count += 1;

        let trade = Trade {
            id: Uuid::new_v4(),
            direction: TradeDirection::Buy,
            quote_asset_amount: quote_in,
            token_amount: quote.output_amount,
            fee_amount: quote.fee_amount,
            supply_before,
            supply_after: quote.resulting_supply,
            executed_at: Utc::now(),
        };
        push_recent(&mut state.recent_trades, trade.clone());
        drop(state);

        debug!(
            trade_id = %trade.id,
            quote_in,
            tokens_out = trade.token_amount,
            fee = trade.fee_amount,
            supply_after = trade.supply_after,
            "curve buy executed"
        );
        let _ = self.events.send(EngineEvent::TradeExecuted {
            trade: trade.clone(),
        });
        Ok(trade)
    }

    /// Sells `token_in` back to the curve, failing with `SlippageExceeded`
    /// when the proceeds fall under `min_quote_out`.
    pub fn sell(&self, token_in: u128, min_quote_out: u128) -> Result<Trade> {
        let mut state = self.state.lock();

        let quote = self.engine.quote_sell(state.circulating_supply, token_in)?;
        if quote.output_amount < min_quote_out {
            return Err(EngineError::SlippageExceeded {
                minimum: min_quote_out,
                actual: quote.output_amount,
            });
        }

        let supply_before = state.circulating_supply;
        let gross = quote.output_amount + quote.fee_amount;
        if gross > state.reserve_balance {
            // Bookkeeping only: payouts are priced by the curve, not the book.
            warn!(
                gross,
                reserve = state.reserve_balance,
                "sell proceeds exceed tracked reserve"
            );
        }
        state.circulating_supply = quote.resulting_supply;
        state.reserve_balance = state.reserve_balance.saturating_sub(gross);
        state.fees_accrued = state.fees_accrued.saturating_add(quote.fee_amount);
        state.total_sell_volume_quote = state
            .total_sell_volume_quote
            .saturating_add(quote.output_amount);
        state.trade_count += 1;

        let trade = Trade {
            id: Uuid::new_v4(),
            direction: TradeDirection::Sell,
            quote_asset_amount: quote.output_amount,
            token_amount: token_in,
            fee_amount: quote.fee_amount,
            supply_before,
            supply_after: quote.resulting_supply,
            executed_at: Utc::now(),
        };
        push_recent(&mut state.recent_trades, trade.clone());
        drop(state);

        debug!(
            trade_id = %trade.id,
            tokens_in = token_in,
            quote_out = trade.quote_asset_amount,
            fee = trade.fee_amount,
            supply_after = trade.supply_after,
            "curve sell executed"
        );
        let _ = self.events.send(EngineEvent::TradeExecuted {
            trade: trade.clone(),
        });
        Ok(trade)
    }

    /// Privileged escape hatch. Bypasses curve accounting entirely:
    /// circulating supply stays untouched, only the book value moves. Logged
    /// as a distinguished event, never intermixed with trade records.
    pub fn emergency_withdraw(&self, asset: AssetKind, amount: u128) -> Result<()> {
        {
            let mut state = self.state.lock();
            if asset == AssetKind::QuoteAsset {
                state.reserve_balance = state.reserve_balance.saturating_sub(amount);
            }
        }

        warn!(
            target: "curvebot::emergency",
            asset = ?asset,
            amount,
            "🚨 emergency withdrawal, curve accounting bypassed"
        );
        let _ = self.events.send(EngineEvent::EmergencyWithdraw {
            asset,
            amount,
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn recent_trades(&self) -> Vec<Trade> {
        self.state.lock().recent_trades.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        let (supply, reserve, fees, buys, sells, count) = {
            let state = self.state.lock();
            (
                state.circulating_supply,
                state.reserve_balance,
                state.fees_accrued,
                state.total_buy_volume_quote,
                state.total_sell_volume_quote,
                state.trade_count,
            )
        };
        Ok(LedgerSnapshot {
            circulating_supply: supply,
            spot_price: self.engine.price_at(supply)?,
            reserve_balance: reserve,
            fees_accrued: fees,
            total_buy_volume_quote: buys,
            total_sell_volume_quote: sells,
            trade_count: count,
        })
    }
}

fn push_recent(log: &mut VecDeque<Trade>, trade: Trade) {
    if log.len() == RECENT_TRADES_CAP {
        log.pop_front();
    }
    log.push_back(trade);
}
