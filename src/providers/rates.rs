// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exchange-rate lookup.
//!
//! A rate is the fiat price of one unit of the base asset: `XRP/USD = 2`
//! means one XRP costs two US dollars.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use super::cache::TtlCache;

const RATE_CACHE_TTL: Duration = Duration::from_secs(60);
const RATE_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_ascii_uppercase(),
            quote: quote.to_ascii_uppercase(),
        }
    }

    /// XRP priced in `fiat`.
    pub fn xrp(fiat: &str) -> Self {
        Self::new("XRP", fiat)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("Exchange rate {pair} unavailable: {reason}")]
    Unavailable { pair: String, reason: String },
}

impl RateError {
    fn unavailable(pair: &CurrencyPair, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            pair: pair.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    /// Current strictly positive rate, or `Unavailable`.
    async fn get_rate(&self, pair: &CurrencyPair) -> Result<Decimal, RateError>;
}

/// Pinned rate for sandbox deployments (`RATE_OVERRIDE`).
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub Decimal);

#[async_trait]
impl ExchangeRateProvider for FixedRate {
    async fn get_rate(&self, pair: &CurrencyPair) -> Result<Decimal, RateError> {
        if self.0 <= Decimal::ZERO {
            return Err(RateError::unavailable(pair, "configured rate is not positive"));
        }
        Ok(self.0)
    }
}

/// CoinGecko `simple/price` client with a short-lived cache.
pub struct CoinGeckoRates {
    base_url: String,
    timeout: Duration,
    http: Client,
    cache: TtlCache<Decimal>,
}

impl CoinGeckoRates {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, RateError> {
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            RateError::unavailable(&CurrencyPair::xrp("*"), format!("HTTP client: {e}"))
        })?;
        Ok(Self {
            base_url,
            timeout,
            http,
            cache: TtlCache::new(RATE_CACHE_CAPACITY, RATE_CACHE_TTL),
        })
    }

    async fn fetch(&self, pair: &CurrencyPair) -> Result<Decimal, RateError> {
        let coin = coin_id(&pair.base)
            .ok_or_else(|| RateError::unavailable(pair, "unsupported base asset"))?;
        let vs = pair.quote.to_ascii_lowercase();
        let url = format!(
            "{}/api/v3/simple/price?ids={coin}&vs_currencies={vs}",
            self.base_url.trim_end_matches('/')
        );

        let exchange = async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| RateError::unavailable(pair, e.to_string()))?;
            if !response.status().is_success() {
                return Err(RateError::unavailable(
                    pair,
                    format!("rate API returned {}", response.status()),
                ));
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| RateError::unavailable(pair, format!("invalid JSON: {e}")))
        };
        let body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RateError::unavailable(pair, "rate API timed out"))??;

        parse_simple_price(&body, coin, &vs)
            .ok_or_else(|| RateError::unavailable(pair, "rate missing from response"))
    }
}

#[async_trait]
impl ExchangeRateProvider for CoinGeckoRates {
    async fn get_rate(&self, pair: &CurrencyPair) -> Result<Decimal, RateError> {
        let key = pair.to_string();
        if let Some(rate) = self.cache.get(&key) {
            return Ok(rate);
        }

        match self.fetch(pair).await {
            Ok(rate) => {
                debug!(pair = %pair, rate = %rate, "Fetched exchange rate");
                self.cache.put(&key, rate);
                Ok(rate)
            }
            Err(e) => {
                warn!(pair = %pair, error = %e, "Exchange rate lookup failed");
                Err(e)
            }
        }
    }
}

fn coin_id(asset: &str) -> Option<&'static str> {
    match asset {
        "XRP" => Some("ripple"),
        _ => None,
    }
}

/// Extract `body[coin][vs]` as a positive decimal.
fn parse_simple_price(body: &Value, coin: &str, vs: &str) -> Option<Decimal> {
    let number = body.get(coin)?.get(vs)?;
    let raw = match number {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
        .filter(|rate| *rate > Decimal::ZERO)
}
