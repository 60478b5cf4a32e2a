//! Engine configuration
//! Mission: defaults first, environment second, invalid combinations never start
//! Philosophy: every knob has a working default so a bare `cargo run` trades on paper

use std::env;

use serde::Serialize;
use tracing::warn;

use crate::curve::{CurveParameters, PricingEngine};
use crate::error::{EngineError, Result};
use crate::math::{self, WAD};

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Bonding-curve shape and limits. Unit prices are smallest quote units per
/// whole token, supply amounts are token smallest units.
#[derive(Debug, Clone, Serialize)]
pub struct CurveConfig {
    pub steepness: u128,
    pub shift_wad: u128,
    pub base_price: u128,
    pub fee_bps: u16,
    pub max_fee_bps: u16,
    pub min_purchase_quote_amount: u128,
    pub max_curve_supply: u128,
    pub initial_supply: u128,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            steepness: 500_000_000,
            shift_wad: WAD,
            base_price: 2_000_000_000,
            fee_bps: 30,
            max_fee_bps: 100,
            min_purchase_quote_amount: 1_000_000,
            max_curve_supply: 50_000_000 * 1_000_000_000,
            initial_supply: 1_000_000 * 1_000_000_000,
        }
    }
}

impl CurveConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("CURVE_STEEPNESS") {
            cfg.steepness = v.parse().unwrap_or(cfg.steepness);
        }
        if let Ok(v) = env::var("CURVE_SHIFT_WAD") {
            cfg.shift_wad = v.parse().unwrap_or(cfg.shift_wad);
        }
        if let Ok(v) = env::var("CURVE_BASE_PRICE") {
            cfg.base_price = v.parse().unwrap_or(cfg.base_price);
        }
        if let Ok(v) = env::var("CURVE_FEE_BPS") {
            cfg.fee_bps = v.parse().unwrap_or(cfg.fee_bps);
        }
        if let Ok(v) = env::var("CURVE_MAX_FEE_BPS") {
            cfg.max_fee_bps = v.parse().unwrap_or(cfg.max_fee_bps);
        }
        if let Ok(v) = env::var("CURVE_MIN_PURCHASE") {
            cfg.min_purchase_quote_amount = v.parse().unwrap_or(cfg.min_purchase_quote_amount);
        }
        if let Ok(v) = env::var("CURVE_MAX_SUPPLY") {
            cfg.max_curve_supply = v.parse().unwrap_or(cfg.max_curve_supply);
        }
        if let Ok(v) = env::var("CURVE_INITIAL_SUPPLY") {
            cfg.initial_supply = v.parse().unwrap_or(cfg.initial_supply);
        }

        cfg
    }

    pub fn to_parameters(&self) -> CurveParameters {
        CurveParameters {
            steepness: self.steepness,
            shift_wad: self.shift_wad,
            base_price: self.base_price,
            fee_bps: self.fee_bps,
            max_fee_bps: self.max_fee_bps,
            min_purchase_quote_amount: self.min_purchase_quote_amount,
            max_curve_supply: self.max_curve_supply,
        }
    }
}

/// Scheduler knobs. Amounts are smallest units, intervals milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct ArbConfig {
    pub trade_size: u128,
    pub min_profit_threshold: u128,
    pub poll_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub max_slippage_bps: u16,
    pub external_fee_bps: u16,
    /// Quotes older than this are discarded. Zero disables the check.
    pub max_quote_age_ms: u64,
    /// Abandoned-cycle streak that stops the scheduler. Zero disables.
    pub max_consecutive_failures: u32,
    pub halt_on_partial_failure: bool,
    pub dry_run: bool,
    /// Emit a diagnostics summary every N cycles. Zero disables.
    pub summary_every_cycles: u64,
}

impl Default for ArbConfig {
    fn default() -> Self {
        Self {
            trade_size: 1_000_000_000,
            min_profit_threshold: 50_000_000,
            poll_interval_ms: 5_000,
            call_timeout_ms: 7_500,
            max_slippage_bps: 50,
            external_fee_bps: 50,
            max_quote_age_ms: 30_000,
            max_consecutive_failures: 20,
            halt_on_partial_failure: true,
            dry_run: false,
            summary_every_cycles: 12,
        }
    }
}

impl ArbConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("ARB_TRADE_SIZE") {
            cfg.trade_size = v.parse().unwrap_or(cfg.trade_size);
        }
        if let Ok(v) = env::var("ARB_MIN_PROFIT_THRESHOLD") {
            cfg.min_profit_threshold = v.parse().unwrap_or(cfg.min_profit_threshold);
        }
        cfg.poll_interval_ms = env::var("ARB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v >= 100)
            .unwrap_or(cfg.poll_interval_ms);
        cfg.call_timeout_ms = env::var("ARB_CALL_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.call_timeout_ms);
        if let Ok(v) = env::var("ARB_MAX_SLIPPAGE_BPS") {
            cfg.max_slippage_bps = v.parse().unwrap_or(cfg.max_slippage_bps);
        }
        if let Ok(v) = env::var("ARB_EXTERNAL_FEE_BPS") {
            cfg.external_fee_bps = v.parse().unwrap_or(cfg.external_fee_bps);
        }
        if let Ok(v) = env::var("ARB_MAX_QUOTE_AGE_MS") {
            cfg.max_quote_age_ms = v.parse().unwrap_or(cfg.max_quote_age_ms);
        }
        if let Ok(v) = env::var("ARB_MAX_CONSECUTIVE_FAILURES") {
            cfg.max_consecutive_failures = v.parse().unwrap_or(cfg.max_consecutive_failures);
        }
        cfg.halt_on_partial_failure =
            env_bool("ARB_HALT_ON_PARTIAL_FAILURE", cfg.halt_on_partial_failure);
        cfg.dry_run = env_bool("ARB_DRY_RUN", cfg.dry_run);
        if let Ok(v) = env::var("ARB_SUMMARY_EVERY_CYCLES") {
            cfg.summary_every_cycles = v.parse().unwrap_or(cfg.summary_every_cycles);
        }

        cfg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    /// In-process simulated venue. The default: safe to run anywhere.
    Paper,
    /// Live venue over HTTP.
    Rest,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketConfig {
    pub venue: VenueKind,
    pub token_decimals: u8,
    pub rest_base_url: String,
    #[serde(skip_serializing)]
    pub rest_api_key: Option<String>,
    pub http_timeout_ms: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            venue: VenueKind::Paper,
            token_decimals: 9,
            rest_base_url: String::new(),
            rest_api_key: None,
            http_timeout_ms: 10_000,
        }
    }
}

impl MarketConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("VENUE") {
            cfg.venue = match v.to_lowercase().as_str() {
                "paper" => VenueKind::Paper,
                "rest" => VenueKind::Rest,
                other => {
                    warn!(venue = other, "unknown venue kind, falling back to paper");
                    VenueKind::Paper
                }
            };
        }
        if let Ok(v) = env::var("TOKEN_DECIMALS") {
            cfg.token_decimals = v.parse().unwrap_or(cfg.token_decimals);
        }
        if let Ok(v) = env::var("VENUE_BASE_URL") {
            cfg.rest_base_url = v;
        }
        if let Ok(v) = env::var("VENUE_API_KEY") {
            if !v.is_empty() {
                cfg.rest_api_key = Some(v);
            }
        }
        if let Ok(v) = env::var("HTTP_TIMEOUT_MS") {
            cfg.http_timeout_ms = v.parse().unwrap_or(cfg.http_timeout_ms);
        }

        cfg
    }
}

/// Everything the binary needs, assembled once at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineConfig {
    pub curve: CurveConfig,
    pub arb: ArbConfig,
    pub market: MarketConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            curve: CurveConfig::from_env(),
            arb: ArbConfig::from_env(),
            market: MarketConfig::from_env(),
        }
    }

    /// Startup-only validation. A configuration that fails here is fatal;
    /// nothing downgrades these into runtime warnings.
    pub fn validate(&self) -> Result<()> {
        let factor = math::decimals_factor(self.market.token_decimals)?;
        // Also proves the curve prices its whole range, cap + 1 included.
        PricingEngine::new(self.curve.to_parameters(), factor)?;

        if self.curve.initial_supply > self.curve.max_curve_supply {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!(
                    "initial supply {} exceeds max curve supply {}",
                    self.curve.initial_supply, self.curve.max_curve_supply
                ),
            });
        }
        if self.arb.trade_size == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "trade size must be positive".into(),
            });
        }
        if self.arb.poll_interval_ms == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "poll interval must be positive".into(),
            });
        }
        if self.arb.call_timeout_ms == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "call timeout must be positive".into(),
            });
        }
        if self.arb.max_slippage_bps > 10_000 {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!(
                    "max slippage {} bps exceeds 10000",
                    self.arb.max_slippage_bps
                ),
            });
        }
        if self.arb.external_fee_bps >= 10_000 {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!(
                    "external fee {} bps consumes the entire notional",
                    self.arb.external_fee_bps
                ),
            });
        }
        if self.market.venue == VenueKind::Rest {
            if self.market.rest_base_url.trim().is_empty() {
                return Err(EngineError::ConfigurationInvalid {
                    reason: "rest venue requires VENUE_BASE_URL".into(),
                });
            }
            if !self.market.rest_base_url.starts_with("http") {
                return Err(EngineError::ConfigurationInvalid {
                    reason: format!(
                        "rest venue base URL must be http(s): {}",
                        self.market.rest_base_url
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn absurd_token_decimals_are_fatal() {
        let mut cfg = EngineConfig::default();
        cfg.market.token_decimals = 200;
        assert!(matches!(
            cfg.validate().unwrap_err(),
            EngineError::ConfigurationInvalid { .. }
        ));
    }

    #[test]
    fn zero_trade_size_is_fatal() {
        let mut cfg = EngineConfig::default();
        cfg.arb.trade_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn initial_supply_cannot_exceed_the_cap() {
        let mut cfg = EngineConfig::default();
        cfg.curve.initial_supply = cfg.curve.max_curve_supply + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rest_venue_requires_a_url() {
        let mut cfg = EngineConfig::default();
        cfg.market.venue = VenueKind::Rest;
        assert!(cfg.validate().is_err());

        cfg.market.rest_base_url = "ftp://nope".into();
        assert!(cfg.validate().is_err());

        cfg.market.rest_base_url = "https://venue.example.com".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn total_external_fee_is_fatal() {
        let mut cfg = EngineConfig::default();
        cfg.arb.external_fee_bps = 10_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn environment_overrides_apply() {
        env::set_var("CURVE_BASE_PRICE", "3000000000");
        env::set_var("ARB_DRY_RUN", "true");
        env::set_var("ARB_POLL_INTERVAL_MS", "50");
        let cfg = EngineConfig::from_env();
        env::remove_var("CURVE_BASE_PRICE");
        env::remove_var("ARB_DRY_RUN");
        env::remove_var("ARB_POLL_INTERVAL_MS");

        assert_eq!(cfg.curve.base_price, 3_000_000_000);
        assert!(cfg.arb.dry_run);
        // Below the floor, so the default stands.
        assert_eq!(cfg.arb.poll_interval_ms, 5_000);
    }
}
