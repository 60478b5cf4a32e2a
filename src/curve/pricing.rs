//! Logarithmic bonding-curve pricing
//! Mission: supply in, price out, provably monotone over the whole operating range
//! Philosophy: buys pay the ceiling, sells receive the floor, the curve never pays you

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::math::{self, Rounding, WAD};

/// Immutable curve parameters. Unit prices (`steepness`, `base_price`) are in
/// smallest quote units per whole token; `shift_wad` is the dimensionless
/// offset added to the whole-token supply inside the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveParameters {
    pub steepness: u128,
    pub shift_wad: u128,
    pub base_price: u128,
    pub fee_bps: u16,
    pub max_fee_bps: u16,
    pub min_purchase_quote_amount: u128,
    pub max_curve_supply: u128,
}

impl CurveParameters {
    pub fn validate(&self) -> Result<()> {
        if self.max_fee_bps > 10_000 {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!("max fee {} bps exceeds 10000", self.max_fee_bps),
            });
        }
        if self.fee_bps > self.max_fee_bps {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!(
                    "fee {} bps exceeds max fee {} bps",
                    self.fee_bps, self.max_fee_bps
                ),
            });
        }
        if self.base_price == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "base price must be positive".into(),
            });
        }
        if self.shift_wad < WAD {
            return Err(EngineError::ConfigurationInvalid {
                reason: "curve shift must be at least 1.0 (log argument stays >= 1)".into(),
            });
        }
        if self.max_curve_supply == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "max curve supply must be positive".into(),
            });
        }
        Ok(())
    }
}

/// The immutable result of evaluating a hypothetical trade. `output_amount` is
/// tokens for a buy and quote asset for a sell; `fee_amount` is always quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub output_amount: u128,
    pub fee_amount: u128,
    pub resulting_supply: u128,
}

/// Pure, stateless pricing over `unit_price = a * ln(supply/F + b) + c`.
///
/// Every stage of the evaluation (floor-normalize, shift add, binary-digit
/// log, constant multiply, base add) is individually monotone non-decreasing
/// in supply, so the composed price is monotone by construction. Downstream
/// arbitrage logic leans on that: buying only raises the price, selling only
/// lowers it.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    params: CurveParameters,
    decimals_factor: u128,
}

impl PricingEngine {
    /// Validates parameters and proves the curve is priceable one smallest
    /// unit past the cap (the buy-side cap check evaluates there). A curve
    /// that cannot price its own range refuses to start.
    pub fn new(params: CurveParameters, decimals_factor: u128) -> Result<Self> {
        params.validate()?;
        if decimals_factor == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "decimals factor must be positive".into(),
            });
        }

        let engine = Self {
            params,
            decimals_factor,
        };
        engine
            .price_at(engine.params.max_curve_supply.saturating_add(1))
            .map_err(|_| EngineError::ConfigurationInvalid {
                reason: "curve is not priceable across its configured supply range".into(),
            })?;
        Ok(engine)
    }

    pub fn params(&self) -> &CurveParameters {
        &self.params
    }

    pub fn decimals_factor(&self) -> u128 {
        self.decimals_factor
    }

    /// Unit price at `supply`, in smallest quote units per whole token.
    pub fn price_at(&self, supply: u128) -> Result<u128> {
        let whole_tokens_wad = math::normalize(supply, self.decimals_factor)?;
        let argument = whole_tokens_wad
            .checked_add(self.params.shift_wad)
            .ok_or(EngineError::ArithmeticOverflow {
                op: "log argument",
            })?;
        let ln = math::ln_wad(argument)?;
        let scaled = math::mul_div(self.params.steepness, ln, WAD, Rounding::Down)?;
        scaled
            .checked_add(self.params.base_price)
            .ok_or(EngineError::ArithmeticOverflow { op: "unit price" })
    }

    /// Quote cost of traversing `[from_supply, to_supply]`, charged at the
    /// average price over the traversed range (endpoint trapezoid), not the
    /// price at the starting point. Point pricing systematically undercharges
    /// large buys and overpays large sells on a rising curve.
    pub fn cost_for_range(
        &self,
        from_supply: u128,
        to_supply: u128,
        rounding: Rounding,
    ) -> Result<u128> {
        let delta = to_supply
            .checked_sub(from_supply)
            .ok_or(EngineError::ArithmeticOverflow {
                op: "inverted supply range",
            })?;
        if delta == 0 {
            return Ok(0);
        }

        let price_sum = self
            .price_at(from_supply)?
            .checked_add(self.price_at(to_supply)?)
            .ok_or(EngineError::ArithmeticOverflow { op: "price sum" })?;
        let denominator =
            self.decimals_factor
                .checked_mul(2)
                .ok_or(EngineError::ArithmeticOverflow {
                    op: "trapezoid denominator",
                })?;
        math::mul_div(price_sum, delta, denominator, rounding)
    }

    /// Quotes a buy of `quote_in` (smallest quote units) at supply `supply`.
    ///
    /// Fee comes off the top; the net input is inverted to the largest token
    /// amount whose ceiling cost it covers (binary search over the monotone
    /// cost function; deterministic and bounded). Fails with
    /// `SupplyCapExceeded` when the net input could still afford one smallest
    /// unit past the cap. The check is exact, never a clamp of the caller's
    /// funds.
    pub fn quote_buy(&self, supply: u128, quote_in: u128) -> Result<Quote> {
        let fee = math::bps_of(quote_in, self.params.fee_bps)?;
        let net_in = quote_in - fee;

        let remaining =
            self.params
                .max_curve_supply
                .checked_sub(supply)
                .ok_or(EngineError::SupplyCapExceeded {
                    circulating: supply,
                    cap: self.params.max_curve_supply,
                })?;

        if let Some(past_cap_supply) = self.params.max_curve_supply.checked_add(1) {
            let past_cap = self.cost_for_range(supply, past_cap_supply, Rounding::Up)?;
            if past_cap <= net_in {
                return Err(EngineError::SupplyCapExceeded {
                    circulating: supply,
                    cap: self.params.max_curve_supply,
                });
            }
        }

        // Largest T in [0, remaining] with ceil cost <= net input. The cap
        // check above guarantees the answer sits inside the bracket.
        let mut lo = 0u128;
        let mut hi = remaining;
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.cost_for_range(supply, supply + mid, Rounding::Up)? <= net_in {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        Ok(Quote {
            output_amount: lo,
            fee_amount: fee,
            resulting_supply: supply + lo,
        })
    }

    /// Quotes a sell of `token_in` (smallest token units) at supply `supply`:
    /// floor proceeds over `[supply - token_in, supply]`, fee deducted from
    /// the gross.
    pub fn quote_sell(&self, supply: u128, token_in: u128) -> Result<Quote> {
        if token_in > supply {
            return Err(EngineError::InsufficientCirculatingSupply {
                requested: token_in,
                circulating: supply,
            });
        }

        let resulting_supply = supply - token_in;
        let gross = self.cost_for_range(resulting_supply, supply, Rounding::Down)?;
        let fee = math::bps_of(gross, self.params.fee_bps)?;

        Ok(Quote {
            output_amount: gross - fee,
            fee_amount: fee,
            resulting_supply,
        })
    }
}
