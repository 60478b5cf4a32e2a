//! REST venue adapter
//! Mission: quote and swap against a live venue over HTTP
//! Philosophy: pooled client, bounded timeouts, every failure mapped to a typed kind

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::market::{ExternalMarket, ExternalQuote, SwapDirection, SwapReceipt};

#[derive(Debug, Clone)]
pub struct RestMarketConfig {
    /// Venue base URL, e.g. https://venue.example.com
    pub base_url: String,
    /// Optional bearer token for authenticated venues.
    pub api_key: Option<String>,
    /// Per-request timeout budget.
    pub http_timeout_ms: u64,
}

/// Live venue client. Amounts travel as decimal strings: JSON numbers cannot
/// carry u128 smallest-unit values safely.
pub struct RestMarket {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

// Manual Debug so the API key never lands in logs.
impl fmt::Debug for RestMarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestMarket")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: String,
    max_tradable_amount: String,
    as_of: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct SwapRequest<'a> {
    reference: &'a str,
    direction: SwapDirection,
    amount_in: String,
    min_amount_out: String,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    amount_out: String,
    #[serde(default)]
    fee_amount: Option<String>,
    #[serde(default)]
    reference: Option<String>,
}

impl RestMarket {
    pub fn new(config: RestMarketConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(EngineError::ConfigurationInvalid {
                reason: "venue base URL is empty".into(),
            });
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.http_timeout_ms))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| EngineError::ConfigurationInvalid {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        info!(base_url = %config.base_url, "REST venue client initialized");
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

fn parse_units(value: &str) -> Option<u128> {
    value.trim().parse().ok()
}

#[async_trait::async_trait]
impl ExternalMarket for RestMarket {
    async fn quote(&self, token_amount: u128) -> Result<ExternalQuote> {
        let url = format!("{}/v1/quote", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("amount", token_amount.to_string())])
            .send()
            .await
            .map_err(|e| EngineError::ExternalQuoteUnavailable {
                reason: format!("quote request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::ExternalQuoteUnavailable {
                reason: format!("quote endpoint returned {status}: {body}"),
            });
        }

        let payload: QuoteResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::ExternalQuoteUnavailable {
                    reason: format!("malformed quote payload: {e}"),
                })?;

        let price =
            parse_units(&payload.price).ok_or_else(|| EngineError::ExternalQuoteUnavailable {
                reason: format!("unparseable quote price: {}", payload.price),
            })?;
        let max_tradable_amount = parse_units(&payload.max_tradable_amount).ok_or_else(|| {
            EngineError::ExternalQuoteUnavailable {
                reason: format!("unparseable venue depth: {}", payload.max_tradable_amount),
            }
        })?;

        debug!(price, max_tradable_amount, "venue quote received");
        Ok(ExternalQuote {
            price,
            max_tradable_amount,
            as_of: payload.as_of,
        })
    }

    async fn swap(
        &self,
        direction: SwapDirection,
        amount_in: u128,
        min_amount_out: u128,
        deadline: DateTime<Utc>,
    ) -> Result<SwapReceipt> {
        let reference = Uuid::new_v4().to_string();
        let url = format!("{}/v1/swap", self.base_url);
        let request = SwapRequest {
            reference: &reference,
            direction,
            amount_in: amount_in.to_string(),
            min_amount_out: min_amount_out.to_string(),
            deadline,
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::ExternalTradeFailed {
                reason: format!("swap request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::ExternalTradeFailed {
                reason: format!("swap endpoint returned {status}: {body}"),
            });
        }

        let payload: SwapResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::ExternalTradeFailed {
                    reason: format!("malformed swap payload: {e}"),
                })?;

        let amount_out =
            parse_units(&payload.amount_out).ok_or_else(|| EngineError::ExternalTradeFailed {
                reason: format!("unparseable swap output: {}", payload.amount_out),
            })?;
        let fee_amount = payload
            .fee_amount
            .as_deref()
            .and_then(parse_units)
            .unwrap_or(0);

        let receipt = SwapReceipt {
            reference: payload.reference.unwrap_or(reference),
            direction,
            amount_in,
            amount_out,
            fee_amount,
            executed_at: Utc::now(),
        };
        info!(
            reference = %receipt.reference,
            ?direction,
            amount_in,
            amount_out,
            "venue swap acknowledged"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let market = RestMarket::new(RestMarketConfig {
            base_url: "https://venue.example.com/".into(),
            api_key: Some("super-secret-key".into()),
            http_timeout_ms: 5_000,
        })
        .unwrap();

        let rendered = format!("{market:?}");
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("REDACTED"));
        // Trailing slash trimmed so joined paths stay clean.
        assert!(rendered.contains("https://venue.example.com"));
    }

    #[test]
    fn empty_base_url_refuses_to_start() {
        let err = RestMarket::new(RestMarketConfig {
            base_url: "  ".into(),
            api_key: None,
            http_timeout_ms: 5_000,
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::ConfigurationInvalid { .. }));
    }

    #[test]
    fn amount_strings_parse_strictly() {
        assert_eq!(parse_units(" 42 "), Some(42));
        assert_eq!(parse_units("340282366920938463463374607431768211455"), Some(u128::MAX));
        assert_eq!(parse_units("4.2"), None);
        assert_eq!(parse_units("-1"), None);
        assert_eq!(parse_units(""), None);
    }
}
