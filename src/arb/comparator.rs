//! Quote comparison
//! Mission: decide whether the curve/venue spread pays for both legs
//! Philosophy: fee-adjusted net profit or nothing, no directional bias beyond the tie rule

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::market::ExternalQuote;
use crate::math::{self, Rounding};

/// Which leg buys and which leg sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbDirection {
    /// Buy on the bonding curve, sell into the external venue.
    BuyCurveSellExternal,
    /// Buy on the external venue, sell into the bonding curve.
    BuyExternalSellCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArbitrageOpportunity {
    pub direction: ArbDirection,
    /// Expected profit in quote smallest units, after both venues' fees.
    pub estimated_profit: u128,
    /// Token smallest units moved through both legs.
    pub trade_size: u128,
}

/// Scores a curve price against an external quote for a fixed trade size.
///
/// Profit is estimated from spot prices on both sides; the curve's average
/// execution price moves with size, so the estimate is optimistic for large
/// trades and the slippage bounds on execution are what actually protect us.
pub struct QuoteComparator {
    curve_fee_bps: u16,
    external_fee_bps: u16,
    minimum_profit_threshold: u128,
    decimals_factor: u128,
}

impl QuoteComparator {
    pub fn new(
        curve_fee_bps: u16,
        external_fee_bps: u16,
        minimum_profit_threshold: u128,
        decimals_factor: u128,
    ) -> Self {
        Self {
            curve_fee_bps,
            external_fee_bps,
            minimum_profit_threshold,
            decimals_factor,
        }
    }

    pub fn minimum_profit_threshold(&self) -> u128 {
        self.minimum_profit_threshold
    }

    /// Net profit of buying `trade_size` at `buy_price` and selling it at
    /// `sell_price`, after the per-side fees. `None` when the spread (or the
    /// fees) make the direction unprofitable.
    fn net_profit(
        &self,
        buy_price: u128,
        sell_price: u128,
        buy_fee_bps: u16,
        sell_fee_bps: u16,
        trade_size: u128,
    ) -> Result<Option<u128>> {
        // Round against ourselves: pay at least the buy notional, receive at
        // most the sell notional.
        let buy_notional = math::mul_div(buy_price, trade_size, self.decimals_factor, Rounding::Up)?;
        let sell_notional =
            math::mul_div(sell_price, trade_size, self.decimals_factor, Rounding::Down)?;

        let Some(gross) = sell_notional.checked_sub(buy_notional) else {
            return Ok(None);
        };

        let buy_fee = math::bps_of(buy_notional, buy_fee_bps)?;
        let sell_fee = math::bps_of(sell_notional, sell_fee_bps)?;
        let fees = buy_fee
            .checked_add(sell_fee)
            .ok_or(crate::error::EngineError::ArithmeticOverflow { op: "fee sum" })?;

        Ok(gross.checked_sub(fees))
    }

    /// Compare the curve's spot price against an external quote. Returns the
    /// more profitable direction when its net profit meets the threshold,
    /// `None` otherwise. Equal nets resolve to buy-curve-sell-external.
    pub fn compare(
        &self,
        curve_price: u128,
        external: &ExternalQuote,
        trade_size: u128,
    ) -> Result<Option<ArbitrageOpportunity>> {
        if trade_size == 0 {
            return Ok(None);
        }

        let candidates = [
            (
                ArbDirection::BuyCurveSellExternal,
                self.net_profit(
                    curve_price,
                    external.price,
                    self.curve_fee_bps,
                    self.external_fee_bps,
                    trade_size,
                )?,
            ),
            (
                ArbDirection::BuyExternalSellCurve,
                self.net_profit(
                    external.price,
                    curve_price,
                    self.external_fee_bps,
                    self.curve_fee_bps,
                    trade_size,
                )?,
            ),
        ];

        let mut best: Option<ArbitrageOpportunity> = None;
        for (direction, net) in candidates {
            let Some(net) = net else { continue };
            if net < self.minimum_profit_threshold {
                continue;
            }
            // Strict inequality keeps the first direction on ties.
            if best.as_ref().map_or(true, |b| net > b.estimated_profit) {
                best = Some(ArbitrageOpportunity {
                    direction,
                    estimated_profit: net,
                    trade_size,
                });
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const FACTOR: u128 = 1_000_000_000;
    const ONE_TOKEN: u128 = 1_000_000_000;

    fn quote_at(price: u128) -> ExternalQuote {
        ExternalQuote {
            price,
            max_tradable_amount: 1_000_000 * FACTOR,
            as_of: Utc::now(),
        }
    }

    #[test]
    fn thin_spread_below_threshold_yields_nothing() {
        // Curve at 2.10, venue at 2.00, 0.5% fees on both sides. The raw
        // spread is 0.10 per token but fees take 0.0205, so net is 0.0795
        // against a 0.15 threshold.
        let comparator = QuoteComparator::new(50, 50, 150_000_000, FACTOR);
        let result = comparator
            .compare(2_100_000_000, &quote_at(2_000_000_000), ONE_TOKEN)
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn same_spread_clears_a_lower_threshold() {
        let comparator = QuoteComparator::new(50, 50, 50_000_000, FACTOR);
        let opportunity = comparator
            .compare(2_100_000_000, &quote_at(2_000_000_000), ONE_TOKEN)
            .unwrap()
            .unwrap();

        assert_eq!(opportunity.direction, ArbDirection::BuyExternalSellCurve);
        assert_eq!(opportunity.estimated_profit, 79_500_000);
        assert_eq!(opportunity.trade_size, ONE_TOKEN);
    }

    #[test]
    fn cheap_curve_flows_toward_the_venue() {
        // Curve at 2.00, venue at 2.20: buy the curve, sell the venue.
        // Gross 0.20, fees 0.010 + 0.011, net 0.179.
        let comparator = QuoteComparator::new(50, 50, 150_000_000, FACTOR);
        let opportunity = comparator
            .compare(2_000_000_000, &quote_at(2_200_000_000), ONE_TOKEN)
            .unwrap()
            .unwrap();

        assert_eq!(opportunity.direction, ArbDirection::BuyCurveSellExternal);
        assert_eq!(opportunity.estimated_profit, 179_000_000);
    }

    #[test]
    fn net_exactly_at_threshold_qualifies() {
        let comparator = QuoteComparator::new(50, 50, 79_500_000, FACTOR);
        let opportunity = comparator
            .compare(2_100_000_000, &quote_at(2_000_000_000), ONE_TOKEN)
            .unwrap();
        assert!(opportunity.is_some());
    }

    #[test]
    fn fees_can_eat_the_entire_spread() {
        // 0.01 spread, 0.02005 of fees: both directions lose money.
        let comparator = QuoteComparator::new(50, 50, 0, FACTOR);
        let result = comparator
            .compare(2_000_000_000, &quote_at(2_010_000_000), ONE_TOKEN)
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn equal_nets_prefer_buying_the_curve() {
        // No fees and no spread: both directions net zero, and a zero
        // threshold admits both. The curve-first rule decides.
        let comparator = QuoteComparator::new(0, 0, 0, FACTOR);
        let opportunity = comparator
            .compare(2_000_000_000, &quote_at(2_000_000_000), ONE_TOKEN)
            .unwrap()
            .unwrap();

        assert_eq!(opportunity.direction, ArbDirection::BuyCurveSellExternal);
        assert_eq!(opportunity.estimated_profit, 0);
    }

    #[test]
    fn zero_trade_size_is_never_an_opportunity() {
        let comparator = QuoteComparator::new(0, 0, 0, FACTOR);
        let result = comparator
            .compare(2_000_000_000, &quote_at(3_000_000_000), 0)
            .unwrap();
        assert_eq!(result, None);
    }
}
