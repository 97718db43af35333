//! HTTP quote provider
//!
//! Speaks the common per-symbol quote endpoint shape:
//! `GET {base}/quote?symbol=AAPL&token=KEY` returning
//! `{"c": last, "o": open, "h": high, "l": low, "pc": prev close,
//!   "d": change, "dp": change %, "t": unix seconds}`.
//! A zero last price means the vendor does not know the symbol. Bodies
//! without `t` are stamped with the injected clock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use futures::future::join_all;
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;
use types::errors::FeedError;
use types::market::{MarketQuote, Symbol};

use super::provider::{Batching, QuoteProvider};
use crate::clock::Clock;
use crate::config::ProviderConfig;

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    c: Option<f64>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    pc: Option<f64>,
    d: Option<f64>,
    dp: Option<f64>,
    t: Option<i64>,
    #[serde(default)]
    v: Option<u64>,
}

pub struct HttpQuoteProvider {
    config: ProviderConfig,
    client: Client,
    clock: Arc<dyn Clock>,
}

impl HttpQuoteProvider {
    pub fn new(config: ProviderConfig, clock: Arc<dyn Clock>) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| FeedError::Provider {
                provider: config.name.clone(),
                reason: format!("http client: {err}"),
            })?;
        Ok(Self { config, client, clock })
    }

    fn provider_error(&self, reason: impl Into<String>) -> FeedError {
        FeedError::Provider {
            provider: self.config.name.clone(),
            reason: reason.into(),
        }
    }

    async fn fetch_one(&self, symbol: &Symbol) -> Result<Option<MarketQuote>, FeedError> {
        let endpoint = format!("{}/quote", self.config.base_url.trim_end_matches('/'));
        let mut params = vec![("symbol", symbol.as_str())];
        if let Some(key) = &self.config.api_key {
            params.push(("token", key.as_str()));
        }
        let url = Url::parse_with_params(&endpoint, &params)
            .map_err(|err| self.provider_error(format!("bad provider url: {err}")))?;

        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                FeedError::Timeout {
                    operation: format!("{} quote {symbol}", self.config.name),
                    after_ms: self.config.request_timeout.as_millis() as u64,
                }
            } else {
                self.provider_error(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.provider_error(format!("HTTP {status} for {symbol}")));
        }
        let body: QuoteResponse = response
            .json()
            .await
            .map_err(|err| self.provider_error(format!("bad quote body for {symbol}: {err}")))?;
        Ok(self.to_quote(symbol, body))
    }

    fn to_quote(&self, symbol: &Symbol, body: QuoteResponse) -> Option<MarketQuote> {
        let price = body.c.and_then(to_decimal).filter(|p| !p.is_zero())?;
        let timestamp = body
            .t
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(|| self.clock.now());
        Some(MarketQuote {
            symbol: symbol.clone(),
            price,
            open: body.o.and_then(to_decimal),
            high: body.h.and_then(to_decimal),
            low: body.l.and_then(to_decimal),
            previous_close: body.pc.and_then(to_decimal),
            change: body.d.and_then(to_decimal),
            change_percent: body.dp.and_then(to_decimal),
            volume: body.v,
            timestamp,
            source: self.config.name.clone(),
            is_mock_data: false,
        })
    }
}

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::try_from(value).ok().map(|d| d.round_dp(4))
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn batching(&self) -> Batching {
        Batching::new(self.config.batch_size, self.config.inter_batch_delay)
    }

    /// One request per symbol, concurrently within the batch. The batch
    /// fails only if every request in it failed.
    async fn fetch_batch(&self, symbols: &[Symbol]) -> Result<Vec<MarketQuote>, FeedError> {
        let results = join_all(symbols.iter().map(|s| self.fetch_one(s))).await;

        let mut quotes = Vec::new();
        let mut last_error = None;
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(Some(quote)) => quotes.push(quote),
                Ok(None) => debug!(provider = %self.config.name, %symbol, "Unknown symbol"),
                Err(err) => {
                    debug!(provider = %self.config.name, %symbol, %err, "Quote request failed");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if quotes.is_empty() => Err(err.into_provider_error(&self.config.name)),
            _ => Ok(quotes),
        }
    }
}
