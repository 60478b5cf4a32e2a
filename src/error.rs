//! Engine error taxonomy
//! Mission: every failure is a typed kind callers can branch on
//! Philosophy: arithmetic and invariant violations surface, nothing is silently clamped

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// An intermediate or final value cannot be represented in the fixed-point range.
    #[error("arithmetic overflow in {op}")]
    ArithmeticOverflow { op: &'static str },

    /// Trade output fell below the caller's bound.
    #[error("slippage exceeded: output {actual} below minimum {minimum}")]
    SlippageExceeded { minimum: u128, actual: u128 },

    /// A buy would push circulating supply past the curve cap.
    #[error("supply cap exceeded: circulating {circulating}, cap {cap}")]
    SupplyCapExceeded { circulating: u128, cap: u128 },

    /// Quote-asset input below the configured minimum purchase.
    #[error("purchase of {amount} below minimum {minimum}")]
    BelowMinimumPurchase { amount: u128, minimum: u128 },

    /// A sell asked for more tokens than the curve has issued.
    #[error("insufficient circulating supply: requested {requested}, circulating {circulating}")]
    InsufficientCirculatingSupply { requested: u128, circulating: u128 },

    /// External venue quote fetch failed, timed out, or came back stale.
    #[error("external quote unavailable: {reason}")]
    ExternalQuoteUnavailable { reason: String },

    /// External venue rejected or failed a swap submission.
    #[error("external trade failed: {reason}")]
    ExternalTradeFailed { reason: String },

    /// First leg committed, second leg failed. Never auto-unwound; an operator
    /// must resolve the open inventory.
    #[error("partial arbitrage failure: first leg {first_leg} committed, second leg failed")]
    PartialArbitrageFailure {
        first_leg: String,
        #[source]
        source: Box<EngineError>,
    },

    /// Rejected configuration. Fatal at startup, never raised mid-run.
    #[error("invalid configuration: {reason}")]
    ConfigurationInvalid { reason: String },
}

impl EngineError {
    /// Transient per-cycle failures the scheduler absorbs by skipping the cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::ExternalQuoteUnavailable { .. } | EngineError::ExternalTradeFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_amounts() {
        let err = EngineError::SlippageExceeded {
            minimum: 1_000,
            actual: 900,
        };
        let msg = err.to_string();
        assert!(msg.contains("900"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn partial_failure_chains_source() {
        let inner = EngineError::ExternalTradeFailed {
            reason: "venue rejected swap".into(),
        };
        let err = EngineError::PartialArbitrageFailure {
            first_leg: "trade-1".into(),
            source: Box::new(inner),
        };
        let source = std::error::Error::source(&err).expect("source present");
        assert!(source.to_string().contains("venue rejected"));
    }

    #[test]
    fn transient_classification() {
        assert!(EngineError::ExternalQuoteUnavailable {
            reason: "timeout".into()
        }
        .is_transient());
        assert!(!EngineError::SupplyCapExceeded {
            circulating: 10,
            cap: 10
        }
        .is_transient());
    }
}
