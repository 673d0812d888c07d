//! Historical price feed keyed by token pair.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{AutopilotError, Result};

pub mod coingecko;

pub use coingecko::HttpPriceHistory;

/// A pair of tokens on one chain. Prices are quote per base, in whole tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub chain_id: u64,
    pub base: String,
    pub quote: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Seconds since the UNIX epoch.
    pub timestamp: i64,
    pub price: f64,
}

#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// Latest sample at or before `timestamp`, if any.
    async fn price_at(&self, pair: &TokenPair, timestamp: i64) -> Result<Option<PricePoint>>;

    /// Samples with `from <= timestamp <= to`, ordered by timestamp.
    async fn prices_in_range(&self, pair: &TokenPair, from: i64, to: i64) -> Result<Vec<PricePoint>>;
}

/// Price history held in memory. Used by simulation mode and tests.
#[derive(Default)]
pub struct InMemoryPriceHistory {
    series: RwLock<HashMap<TokenPair, BTreeMap<i64, f64>>>,
    failing_reads: AtomicU32,
}

impl InMemoryPriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pair: &TokenPair, timestamp: i64, price: f64) {
        self.series
            .write()
            .entry(pair.clone())
            .or_default()
            .insert(timestamp, price);
    }

    pub fn record_all(&self, pair: &TokenPair, samples: &[(i64, f64)]) {
        for (timestamp, price) in samples {
            self.record(pair, *timestamp, *price);
        }
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> Result<()> {
        let failed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AutopilotError::transient("price_history", "injected read failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceHistoryProvider for InMemoryPriceHistory {
    async fn price_at(&self, pair: &TokenPair, timestamp: i64) -> Result<Option<PricePoint>> {
        self.check_injected_failure()?;
        let series = self.series.read();
        Ok(series.get(pair).and_then(|s| {
            s.range(..=timestamp)
                .next_back()
                .map(|(ts, price)| PricePoint { timestamp: *ts, price: *price })
        }))
    }

    async fn prices_in_range(&self, pair: &TokenPair, from: i64, to: i64) -> Result<Vec<PricePoint>> {
        self.check_injected_failure()?;
        if from > to {
            return Ok(Vec::new());
        }
        let series = self.series.read();
        Ok(series
            .get(pair)
            .map(|s| {
                s.range(from..=to)
                    .map(|(ts, price)| PricePoint { timestamp: *ts, price: *price })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pair() -> TokenPair {
        TokenPair {
            chain_id: 1,
            base: "0xweth".to_string(),
            quote: "0xusdc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_price_at_is_at_or_before() {
        let history = InMemoryPriceHistory::new();
        history.record_all(&pair(), &[(100, 1.0), (200, 2.0)]);

        assert_eq!(history.price_at(&pair(), 99).await.unwrap(), None);
        assert_eq!(
            history.price_at(&pair(), 150).await.unwrap(),
            Some(PricePoint { timestamp: 100, price: 1.0 })
        );
        assert_eq!(
            history.price_at(&pair(), 200).await.unwrap(),
            Some(PricePoint { timestamp: 200, price: 2.0 })
        );
    }

    #[tokio::test]
    async fn test_prices_in_range_ordered_and_inclusive() {
        let history = InMemoryPriceHistory::new();
        history.record_all(&pair(), &[(300, 3.0), (100, 1.0), (200, 2.0), (400, 4.0)]);

        let samples = history.prices_in_range(&pair(), 100, 300).await.unwrap();
        let timestamps: Vec<i64> = samples.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }
}
