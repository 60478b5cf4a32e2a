//! Engine event bus
//! Mission: one broadcast stream for everything the engine does
//! Philosophy: emitters never block and never fail; consumers that lag lose events, not the engine

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::arb::ArbDirection;
use crate::curve::{AssetKind, Trade, TradeDirection};

/// Everything observable about a running engine, in emission order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A curve trade committed to the ledger.
    TradeExecuted { trade: Trade },
    /// Reserve or token balance pulled out past the curve's accounting.
    EmergencyWithdraw {
        asset: AssetKind,
        amount: u128,
        at: DateTime<Utc>,
    },
    /// The comparator found a spread worth taking.
    OpportunityFound {
        direction: ArbDirection,
        estimated_profit: u128,
        trade_size: u128,
    },
    /// Prices were compared and nothing cleared the threshold.
    OpportunitySkipped {
        curve_price: u128,
        external_price: u128,
    },
    /// A polling cycle was abandoned before any leg executed.
    CycleFailed { reason: String },
    /// The first leg filled and the second did not. Position is unbalanced.
    PartialArbitrageFailure {
        direction: ArbDirection,
        first_leg: String,
        reason: String,
    },
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::TradeExecuted { trade } => {
            info!(
                trade_id = %trade.id,
                direction = ?trade.direction,
                token_amount = trade.token_amount,
                quote_asset_amount = trade.quote_asset_amount,
                fee_amount = trade.fee_amount,
                supply_after = trade.supply_after,
                "✅ trade executed"
            );
            if trade.direction == TradeDirection::Buy && trade.token_amount == 0 {
                debug!(trade_id = %trade.id, "buy cleared fees but minted nothing");
            }
        }
        EngineEvent::EmergencyWithdraw { asset, amount, at } => {
            warn!(?asset, amount, at = %at, "🚨 emergency withdrawal recorded");
        }
        EngineEvent::OpportunityFound {
            direction,
            estimated_profit,
            trade_size,
        } => {
            info!(
                ?direction,
                estimated_profit, trade_size, "🎯 arbitrage opportunity"
            );
        }
        EngineEvent::OpportunitySkipped {
            curve_price,
            external_price,
        } => {
            debug!(curve_price, external_price, "spread below threshold");
        }
        EngineEvent::CycleFailed { reason } => {
            warn!(%reason, "⚠️ cycle abandoned");
        }
        EngineEvent::PartialArbitrageFailure {
            direction,
            first_leg,
            reason,
        } => {
            error!(
                ?direction,
                %first_leg,
                %reason,
                "🚨 PARTIAL ARBITRAGE FAILURE: first leg filled, second leg did not"
            );
        }
    }
}

/// Drains the event bus into structured logs. Spawned once at startup and
/// runs until every sender is dropped.
pub async fn run_event_logger(mut rx: broadcast::Receiver<EngineEvent>) {
    info!("📡 event logger started");
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(dropped = n, "event logger lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    info!("event logger stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = EngineEvent::OpportunityFound {
            direction: ArbDirection::BuyExternalSellCurve,
            estimated_profit: 79_500_000,
            trade_size: 1_000_000_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "opportunity_found");
        assert_eq!(json["direction"], "buy_external_sell_curve");
        assert_eq!(json["estimated_profit"], 79_500_000u64);
    }

    #[test]
    fn cycle_failures_carry_their_reason() {
        let event = EngineEvent::CycleFailed {
            reason: "external quote timed out".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cycle_failed");
        assert_eq!(json["reason"], "external quote timed out");
    }

    #[tokio::test]
    async fn logger_exits_when_the_bus_closes() {
        let (tx, rx) = broadcast::channel(8);
        let handle = tokio::spawn(run_event_logger(rx));
        tx.send(EngineEvent::OpportunitySkipped {
            curve_price: 2_100_000_000,
            external_price: 2_000_000_000,
        })
        .unwrap();
        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
