//! External collaborator capabilities
//! Mission: the engine sees venues and tokens only through these seams
//! Philosophy: one implementation per real venue, a deterministic fake for tests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod paper;
pub mod rest;

pub use paper::{PaperMarket, PaperMarketConfig, PaperToken, ENGINE_ACCOUNT};
pub use rest::{RestMarket, RestMarketConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    QuoteToToken,
    TokenToQuote,
}

/// Snapshot quote from the external venue. `price` is smallest quote units
/// per whole token; `max_tradable_amount` is the venue's depth in smallest
/// token units. Treated as read-only data, not owned by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalQuote {
    pub price: u128,
    pub max_tradable_amount: u128,
    pub as_of: DateTime<Utc>,
}

/// Acknowledgement of an executed external swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub reference: String,
    pub direction: SwapDirection,
    pub amount_in: u128,
    pub amount_out: u128,
    pub fee_amount: u128,
    pub executed_at: DateTime<Utc>,
}

/// Token collaborator. The ledger reads `decimals()` exactly once at
/// construction; transfers and balances are boundary concerns.
#[async_trait::async_trait]
pub trait Token: Send + Sync {
    fn decimals(&self) -> u8;
    async fn balance_of(&self, holder: &str) -> Result<u128>;
    async fn transfer(&self, to: &str, amount: u128) -> Result<()>;
    async fn transfer_from(&self, from: &str, to: &str, amount: u128) -> Result<()>;
}

/// External market venue. Quotes are read-mostly; swaps are write-rarely and
/// every write carries a mandatory deadline. No transactional guarantee
/// beyond synchronous success or failure per call.
#[async_trait::async_trait]
pub trait ExternalMarket: Send + Sync {
    async fn quote(&self, token_amount: u128) -> Result<ExternalQuote>;
    async fn swap(
        &self,
        direction: SwapDirection,
        amount_in: u128,
        min_amount_out: u128,
        deadline: DateTime<Utc>,
    ) -> Result<SwapReceipt>;
}
