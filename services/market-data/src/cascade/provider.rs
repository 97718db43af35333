//! Quote provider port and rate-limited batching

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};
use types::errors::FeedError;
use types::market::{MarketQuote, Symbol};

use super::circuit::ProviderCircuit;

/// Vendor call-rate shape: symbols per call batch and the pause between
/// batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batching {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Batching {
    pub fn new(batch_size: usize, inter_batch_delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            inter_batch_delay,
        }
    }
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    fn batching(&self) -> Batching;

    /// Fetch quotes for one batch. Symbols the vendor does not know are
    /// simply absent from the result.
    async fn fetch_batch(&self, symbols: &[Symbol]) -> Result<Vec<MarketQuote>, FeedError>;
}

/// Everything one provider returned across all batches.
#[derive(Debug, Default)]
pub struct StageOutcome {
    pub quotes: Vec<MarketQuote>,
    pub errors: Vec<FeedError>,
    /// The circuit was open before some batch, so the rest were not sent.
    pub skipped: bool,
}

/// Call `provider` batch by batch, pausing between batches. A failed batch
/// is recorded and the remaining batches still run.
pub async fn fetch_in_batches(provider: &dyn QuoteProvider, symbols: &[Symbol]) -> StageOutcome {
    fetch_guarded(provider, None, symbols).await
}

/// [`fetch_in_batches`] behind `circuit`: each batch must be admitted
/// first, and its outcome feeds the circuit. An open circuit ends the
/// stage without sending anything more.
pub async fn fetch_guarded(
    provider: &dyn QuoteProvider,
    circuit: Option<&ProviderCircuit>,
    symbols: &[Symbol],
) -> StageOutcome {
    let batching = provider.batching();
    let mut outcome = StageOutcome::default();

    for (index, batch) in symbols.chunks(batching.batch_size).enumerate() {
        let permit = match circuit.map(ProviderCircuit::admit) {
            Some(None) => {
                debug!(provider = provider.name(), batch = index, "Circuit open, skipping provider");
                outcome.skipped = true;
                break;
            }
            Some(permit) => permit,
            None => None,
        };
        if index > 0 && !batching.inter_batch_delay.is_zero() {
            tokio::time::sleep(batching.inter_batch_delay).await;
        }
        let started = Instant::now();
        let result = provider.fetch_batch(batch).await;
        let latency = started.elapsed();
        match result {
            Ok(quotes) => {
                debug!(provider = provider.name(), batch = index, requested = batch.len(), returned = quotes.len(), "Batch fetched");
                if let Some(permit) = permit {
                    permit.succeeded(latency);
                }
                outcome.quotes.extend(quotes);
            }
            Err(err) => {
                warn!(provider = provider.name(), batch = index, %err, "Batch failed");
                if let Some(permit) = permit {
                    permit.failed(latency, &err);
                }
                outcome.errors.push(err);
            }
        }
    }
    outcome
}
