//! Bonding-curve pricing and the ledger that owns its state.

pub mod ledger;
pub mod pricing;

pub use ledger::{AssetKind, CurveLedger, LedgerSnapshot, Trade, TradeDirection};
pub use pricing::{CurveParameters, PricingEngine, Quote};
