//! Terminal cascade stage: deterministic synthetic quotes
//!
//! Always resolves every symbol. Values are derived from a SHA-256 seed of
//! the symbol, so the same symbol always gets the same synthetic quote
//! shape. Every row is tagged `is_mock_data`.

use std::sync::Arc;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use types::errors::FeedError;
use types::market::{MarketQuote, Symbol};

use super::provider::{Batching, QuoteProvider};
use crate::clock::Clock;

pub const PROVIDER_NAME: &str = "deterministic_fallback";

/// RNG seed for a symbol.
pub fn seed_for(symbol: &str) -> [u8; 32] {
    Sha256::digest(symbol.as_bytes()).into()
}

pub struct DeterministicFallback {
    clock: Arc<dyn Clock>,
}

impl DeterministicFallback {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn generate(&self, symbol: &Symbol) -> MarketQuote {
        let mut rng = ChaCha8Rng::from_seed(seed_for(symbol.as_str()));

        // Prices in cents, moves in basis points.
        let previous_close = Decimal::new(rng.gen_range(5_000..=50_000), 2);
        let change_bp: i64 = rng.gen_range(-500..=500);
        let high_bp: i64 = rng.gen_range(0..=300);
        let low_bp: i64 = rng.gen_range(0..=300);
        let volume: u64 = rng.gen_range(500_000..=5_500_000);

        let bp = |value: Decimal, points: i64| (value * Decimal::new(points, 4)).round_dp(2);
        let change = bp(previous_close, change_bp);
        let price = previous_close + change;
        let high = price.max(previous_close) + bp(price, high_bp);
        let low = price.min(previous_close) - bp(price, low_bp);

        MarketQuote {
            symbol: symbol.clone(),
            price,
            open: Some(previous_close),
            high: Some(high),
            low: Some(low),
            previous_close: Some(previous_close),
            change: Some(change),
            change_percent: Some(Decimal::new(change_bp, 2)),
            volume: Some(volume),
            timestamp: self.clock.now(),
            source: PROVIDER_NAME.to_string(),
            is_mock_data: true,
        }
    }
}

#[async_trait]
impl QuoteProvider for DeterministicFallback {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn batching(&self) -> Batching {
        Batching::new(usize::MAX, std::time::Duration::ZERO)
    }

    async fn fetch_batch(&self, symbols: &[Symbol]) -> Result<Vec<MarketQuote>, FeedError> {
        Ok(symbols.iter().map(|s| self.generate(s)).collect())
    }
}
