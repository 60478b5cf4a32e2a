//! Paper venue and token for simulation and tests
//! Mission: realistic venue behavior without touching a real market
//! Philosophy: deterministic by default, failure injection when asked

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Duration};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::market::{ExternalMarket, ExternalQuote, SwapDirection, SwapReceipt, Token};
use crate::math::{self, Rounding};

/// Account the paper token treats as the process's own signing identity.
pub const ENGINE_ACCOUNT: &str = "engine";

#[derive(Debug, Clone)]
pub struct PaperMarketConfig {
    /// Token decimals, for converting between quote notionals and token amounts.
    pub token_decimals: u8,
    /// Venue price in smallest quote units per whole token.
    pub initial_price: u128,
    /// Taker fee charged in the quote asset.
    pub fee_bps: u16,
    /// Depth the venue will quote, smallest token units.
    pub max_tradable_amount: u128,
    /// Base simulated latency in ms (plus random jitter).
    pub base_latency_ms: u64,
    /// Max additional random latency in ms.
    pub latency_jitter_ms: u64,
    /// Probability a quote fetch fails (0.0 to 1.0).
    pub quote_failure_prob: f64,
    /// Probability a swap submission fails (0.0 to 1.0).
    pub swap_failure_prob: f64,
    /// Max random walk step per quote, in bps of the current price. Zero
    /// keeps the venue price fixed (deterministic tests rely on this).
    pub drift_bps: u16,
}

impl Default for PaperMarketConfig {
    fn default() -> Self {
        Self {
            token_decimals: 9,
            initial_price: 2_000_000_000, // 2.0 at 9 decimals
            fee_bps: 50,                  // 0.5% taker
            max_tradable_amount: 1_000_000 * 1_000_000_000,
            base_latency_ms: 0,
            latency_jitter_ms: 0,
            quote_failure_prob: 0.0,
            swap_failure_prob: 0.0,
            drift_bps: 0,
        }
    }
}

impl PaperMarketConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("PAPER_VENUE_PRICE") {
            if let Ok(price) = v.parse() {
                config.initial_price = price;
            }
        }
        if let Ok(v) = std::env::var("PAPER_VENUE_FEE_BPS") {
            if let Ok(bps) = v.parse() {
                config.fee_bps = bps;
            }
        }
        if let Ok(v) = std::env::var("PAPER_VENUE_DEPTH") {
            if let Ok(depth) = v.parse() {
                config.max_tradable_amount = depth;
            }
        }
        if let Ok(v) = std::env::var("PAPER_VENUE_BASE_LATENCY_MS") {
            if let Ok(ms) = v.parse() {
                config.base_latency_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PAPER_VENUE_LATENCY_JITTER_MS") {
            if let Ok(ms) = v.parse() {
                config.latency_jitter_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PAPER_VENUE_QUOTE_FAILURE_PROB") {
            if let Ok(prob) = v.parse() {
                config.quote_failure_prob = prob;
            }
        }
        if let Ok(v) = std::env::var("PAPER_VENUE_SWAP_FAILURE_PROB") {
            if let Ok(prob) = v.parse() {
                config.swap_failure_prob = prob;
            }
        }
        if let Ok(v) = std::env::var("PAPER_VENUE_DRIFT_BPS") {
            if let Ok(bps) = v.parse() {
                config.drift_bps = bps;
            }
        }

        config
    }
}

/// Simulated external venue with a single adjustable price level.
pub struct PaperMarket {
    config: PaperMarketConfig,
    decimals_factor: u128,
    price: Mutex<u128>,
}

impl PaperMarket {
    pub fn new(config: PaperMarketConfig) -> Result<Self> {
        let decimals_factor = math::decimals_factor(config.token_decimals)?;
        if config.initial_price == 0 {
            return Err(EngineError::ConfigurationInvalid {
                reason: "paper venue price must be positive".into(),
            });
        }
        if u128::from(config.fee_bps) >= math::BPS_DENOMINATOR {
            return Err(EngineError::ConfigurationInvalid {
                reason: format!("paper venue fee of {} bps swallows every swap", config.fee_bps),
            });
        }
        Ok(Self {
            decimals_factor,
            price: Mutex::new(config.initial_price),
            config,
        })
    }

    pub fn price(&self) -> u128 {
        *self.price.lock()
    }

    /// Moves the venue price. Tests use this to stage a spread.
    pub fn set_price(&self, price: u128) {
        *self.price.lock() = price;
    }

    async fn simulate_latency(&self, rng: &mut StdRng) -> u64 {
        let jitter: u64 = rng.gen_range(0..=self.config.latency_jitter_ms);
        let total = self.config.base_latency_ms + jitter;
        if total > 0 {
            sleep(Duration::from_millis(total)).await;
        }
        total
    }

    fn drift(&self, rng: &mut StdRng) {
        if self.config.drift_bps == 0 {
            return;
        }
        let step: u16 = rng.gen_range(0..=self.config.drift_bps);
        let mut price = self.price.lock();
        let delta = math::bps_of(*price, step).unwrap_or(0);
        if rng.gen::<bool>() {
            *price = price.saturating_add(delta);
        } else {
            *price = price.saturating_sub(delta).max(1);
        }
    }
}

#[async_trait::async_trait]
impl ExternalMarket for PaperMarket {
    async fn quote(&self, token_amount: u128) -> Result<ExternalQuote> {
        let mut rng = StdRng::from_entropy();
        self.simulate_latency(&mut rng).await;

        if rng.gen::<f64>() < self.config.quote_failure_prob {
            return Err(EngineError::ExternalQuoteUnavailable {
                reason: "paper venue quote failed (simulated)".into(),
            });
        }

        self.drift(&mut rng);
        let quote = ExternalQuote {
            price: self.price(),
            max_tradable_amount: self.config.max_tradable_amount,
            as_of: Utc::now(),
        };
        debug!(
            token_amount,
            price = quote.price,
            "paper venue quote served"
        );
        Ok(quote)
    }

    async fn swap(
        &self,
        direction: SwapDirection,
        amount_in: u128,
        min_amount_out: u128,
        deadline: DateTime<Utc>,
    ) -> Result<SwapReceipt> {
        let mut rng = StdRng::from_entropy();
        let latency_ms = self.simulate_latency(&mut rng).await;

        if Utc::now() > deadline {
            return Err(EngineError::ExternalTradeFailed {
                reason: format!("swap deadline exceeded after {latency_ms}ms"),
            });
        }
        if rng.gen::<f64>() < self.config.swap_failure_prob {
            return Err(EngineError::ExternalTradeFailed {
                reason: "paper venue rejected swap (simulated)".into(),
            });
        }

        let price = self.price();
        let (amount_out, fee_amount) = match direction {
            SwapDirection::QuoteToToken => {
                // Fee is taken from the quote input, the remainder converts
                // at the venue price.
                let fee = math::bps_of(amount_in, self.config.fee_bps)?;
                let tokens =
                    math::mul_div(amount_in - fee, self.decimals_factor, price, Rounding::Down)?;
                if tokens > self.config.max_tradable_amount {
                    return Err(EngineError::ExternalTradeFailed {
                        reason: "paper venue depth exhausted".into(),
                    });
                }
                (tokens, fee)
            }
            SwapDirection::TokenToQuote => {
                if amount_in > self.config.max_tradable_amount {
                    return Err(EngineError::ExternalTradeFailed {
                        reason: "paper venue depth exhausted".into(),
                    });
                }
                let gross = math::mul_div(amount_in, price, self.decimals_factor, Rounding::Down)?;
                let fee = math::bps_of(gross, self.config.fee_bps)?;
                (gross - fee, fee)
            }
        };

        if amount_out < min_amount_out {
            return Err(EngineError::ExternalTradeFailed {
                reason: format!("min amount out not met: {amount_out} < {min_amount_out}"),
            });
        }

        let receipt = SwapReceipt {
            reference: format!("paper:{}", Uuid::new_v4()),
            direction,
            amount_in,
            amount_out,
            fee_amount,
            executed_at: Utc::now(),
        };
        debug!(
            reference = %receipt.reference,
            ?direction,
            amount_in,
            amount_out,
            "paper venue swap filled"
        );
        Ok(receipt)
    }
}

/// In-memory token: fixed decimals plus a balance map. The deterministic
/// Token capability for paper mode and tests.
pub struct PaperToken {
    decimals: u8,
    balances: Mutex<HashMap<String, u128>>,
}

impl PaperToken {
    pub fn new(decimals: u8) -> Self {
        Self {
            decimals,
            balances: Mutex::new(HashMap::new()),
        }
    }

    /// Credits a holder out of thin air. Test and simulation funding only.
    pub fn mint(&self, holder: &str, amount: u128) {
        let mut balances = self.balances.lock();
        let entry = balances.entry(holder.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }
}

#[async_trait::async_trait]
impl Token for PaperToken {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    async fn balance_of(&self, holder: &str) -> Result<u128> {
        Ok(self.balances.lock().get(holder).copied().unwrap_or(0))
    }

    async fn transfer(&self, to: &str, amount: u128) -> Result<()> {
        self.transfer_from(ENGINE_ACCOUNT, to, amount).await
    }

    async fn transfer_from(&self, from: &str, to: &str, amount: u128) -> Result<()> {
        let mut balances = self.balances.lock();
        let from_balance = balances.get(from).copied().unwrap_or(0);
        if from_balance < amount {
            return Err(EngineError::ExternalTradeFailed {
                reason: format!("token balance of {from} too low: {from_balance} < {amount}"),
            });
        }
        balances.insert(from.to_string(), from_balance - amount);
        let to_balance = balances.entry(to.to_string()).or_insert(0);
        *to_balance = to_balance.saturating_add(amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic_market() -> PaperMarket {
        PaperMarket::new(PaperMarketConfig::default()).unwrap()
    }

    fn far_deadline() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(30)
    }

    #[tokio::test]
    async fn quote_reports_current_price_and_depth() {
        let market = deterministic_market();
        market.set_price(2_100_000_000);
        let quote = market.quote(1_000_000_000).await.unwrap();
        assert_eq!(quote.price, 2_100_000_000);
        assert_eq!(quote.max_tradable_amount, 1_000_000 * 1_000_000_000);
    }

    #[tokio::test]
    async fn quote_to_token_swap_charges_fee_on_input() {
        let market = deterministic_market();
        // 2.0 quote in at price 2.0 with 50 bps fee: 1.99 net buys 0.995 tokens.
        let receipt = market
            .swap(SwapDirection::QuoteToToken, 2_000_000_000, 0, far_deadline())
            .await
            .unwrap();
        assert_eq!(receipt.fee_amount, 10_000_000);
        assert_eq!(receipt.amount_out, 995_000_000);
    }

    #[tokio::test]
    async fn token_to_quote_swap_charges_fee_on_proceeds() {
        let market = deterministic_market();
        // 1 whole token at 2.0 grosses 2.0, fee 50 bps leaves 1.99.
        let receipt = market
            .swap(SwapDirection::TokenToQuote, 1_000_000_000, 0, far_deadline())
            .await
            .unwrap();
        assert_eq!(receipt.fee_amount, 10_000_000);
        assert_eq!(receipt.amount_out, 1_990_000_000);
    }

    #[tokio::test]
    async fn swap_rejects_expired_deadline() {
        let market = deterministic_market();
        let past = Utc::now() - chrono::Duration::seconds(1);
        let err = market
            .swap(SwapDirection::TokenToQuote, 1_000_000_000, 0, past)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalTradeFailed { .. }));
    }

    #[tokio::test]
    async fn swap_enforces_min_amount_out() {
        let market = deterministic_market();
        let err = market
            .swap(
                SwapDirection::TokenToQuote,
                1_000_000_000,
                2_000_000_000, // gross before fees, unreachable after
                far_deadline(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalTradeFailed { .. }));
    }

    #[tokio::test]
    async fn forced_failures_surface_as_typed_errors() {
        let market = PaperMarket::new(PaperMarketConfig {
            quote_failure_prob: 1.0,
            swap_failure_prob: 1.0,
            ..PaperMarketConfig::default()
        })
        .unwrap();

        assert!(matches!(
            market.quote(1).await.unwrap_err(),
            EngineError::ExternalQuoteUnavailable { .. }
        ));
        assert!(matches!(
            market
                .swap(SwapDirection::QuoteToToken, 1_000_000, 0, far_deadline())
                .await
                .unwrap_err(),
            EngineError::ExternalTradeFailed { .. }
        ));
    }

    #[tokio::test]
    async fn paper_token_moves_balances() {
        let token = PaperToken::new(9);
        token.mint(ENGINE_ACCOUNT, 5_000);
        token.transfer("alice", 2_000).await.unwrap();
        assert_eq!(token.balance_of(ENGINE_ACCOUNT).await.unwrap(), 3_000);
        assert_eq!(token.balance_of("alice").await.unwrap(), 2_000);

        let err = token
            .transfer_from("alice", "bob", 2_001)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalTradeFailed { .. }));
        assert_eq!(token.balance_of("alice").await.unwrap(), 2_000);
    }
}
