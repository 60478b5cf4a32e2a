//! Cross-market arbitrage: spread evaluation and the execution loop.

pub mod comparator;
pub mod scheduler;

pub use comparator::{ArbDirection, ArbitrageOpportunity, QuoteComparator};
pub use scheduler::{ArbitrageScheduler, CycleOutcome, DiagnosticsSnapshot, SchedulerPhase};
