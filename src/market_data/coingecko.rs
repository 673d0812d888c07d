use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{PriceHistoryProvider, PricePoint, TokenPair};
use crate::chain::chain_info;
use crate::error::{handle_reqwest_error, retry_with_backoff, AutopilotError, Result};

/// How far back `price_at` searches for a sample.
const PRICE_AT_LOOKBACK_SECS: i64 = 6 * 60 * 60;

const FETCH_RETRIES: u32 = 2;
const FETCH_RETRY_DELAY_MS: u64 = 250;

#[derive(Debug, Deserialize)]
struct MarketChart {
    /// `[unix_millis, usd_price]` pairs.
    prices: Vec<(f64, f64)>,
}

/// Historical prices from a CoinGecko-compatible `market_chart/range` endpoint.
///
/// Each token is fetched in USD; the pair price is base/quote using the quote
/// sample at or before each base sample.
pub struct HttpPriceHistory {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPriceHistory {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| handle_reqwest_error(e, "building price feed client"))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn usd_series(&self, chain_id: u64, token: &str, from: i64, to: i64) -> Result<BTreeMap<i64, f64>> {
        retry_with_backoff(
            || self.fetch_usd_series(chain_id, token, from, to),
            FETCH_RETRIES,
            FETCH_RETRY_DELAY_MS,
        )
        .await
    }

    async fn fetch_usd_series(&self, chain_id: u64, token: &str, from: i64, to: i64) -> Result<BTreeMap<i64, f64>> {
        let platform = chain_info(chain_id)
            .map(|info| info.price_platform)
            .ok_or_else(|| AutopilotError::validation(format!("unsupported chain {}", chain_id)))?;
        let url = format!(
            "{}/coins/{}/contract/{}/market_chart/range",
            self.base_url,
            platform,
            token.to_lowercase()
        );

        let mut request = self.client.get(&url).query(&[
            ("vs_currency", "usd".to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| handle_reqwest_error(e, "price feed request"))?
            .error_for_status()
            .map_err(|e| handle_reqwest_error(e, "price feed status"))?;
        let chart: MarketChart = response
            .json()
            .await
            .map_err(|e| handle_reqwest_error(e, "price feed body"))?;

        debug!(chain_id, token, samples = chart.prices.len(), "Fetched USD price series");
        Ok(to_series(&chart))
    }

    async fn pair_series(&self, pair: &TokenPair, from: i64, to: i64) -> Result<Vec<PricePoint>> {
        // Quote series starts one lookback earlier so the first base sample can be aligned
        let base = self.usd_series(pair.chain_id, &pair.base, from, to).await?;
        let quote = self
            .usd_series(pair.chain_id, &pair.quote, from - PRICE_AT_LOOKBACK_SECS, to)
            .await?;
        Ok(align_pair_series(&base, &quote))
    }
}

fn to_series(chart: &MarketChart) -> BTreeMap<i64, f64> {
    chart
        .prices
        .iter()
        .map(|(millis, price)| ((*millis / 1000.0) as i64, *price))
        .collect()
}

/// Divides each base sample by the latest quote sample at or before it.
fn align_pair_series(base: &BTreeMap<i64, f64>, quote: &BTreeMap<i64, f64>) -> Vec<PricePoint> {
    base.iter()
        .filter_map(|(ts, base_usd)| {
            quote
                .range(..=*ts)
                .next_back()
                .filter(|(_, quote_usd)| **quote_usd > 0.0)
                .map(|(_, quote_usd)| PricePoint {
                    timestamp: *ts,
                    price: base_usd / quote_usd,
                })
        })
        .collect()
}

#[async_trait]
impl PriceHistoryProvider for HttpPriceHistory {
    async fn price_at(&self, pair: &TokenPair, timestamp: i64) -> Result<Option<PricePoint>> {
        let series = self
            .pair_series(pair, timestamp - PRICE_AT_LOOKBACK_SECS, timestamp)
            .await?;
        Ok(series.into_iter().rev().find(|p| p.timestamp <= timestamp))
    }

    async fn prices_in_range(&self, pair: &TokenPair, from: i64, to: i64) -> Result<Vec<PricePoint>> {
        if from > to {
            return Ok(Vec::new());
        }
        let series = self.pair_series(pair, from, to).await?;
        Ok(series
            .into_iter()
            .filter(|p| p.timestamp >= from && p.timestamp <= to)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_market_chart() {
        let body = r#"{"prices":[[1700000000000,2000.5],[1700000300000,2001.0]],"market_caps":[],"total_volumes":[]}"#;
        let chart: MarketChart = serde_json::from_str(body).unwrap();
        let series = to_series(&chart);
        assert_eq!(series.get(&1_700_000_000), Some(&2000.5));
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_align_pair_series_uses_quote_at_or_before() {
        let base: BTreeMap<i64, f64> = [(100, 2000.0), (200, 2200.0), (300, 1800.0)].into_iter().collect();
        let quote: BTreeMap<i64, f64> = [(150, 1.0), (250, 2.0)].into_iter().collect();

        let aligned = align_pair_series(&base, &quote);
        assert_eq!(
            aligned,
            vec![
                PricePoint { timestamp: 200, price: 2200.0 },
                PricePoint { timestamp: 300, price: 900.0 },
            ]
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let feed = HttpPriceHistory::new("https://example.test/api/v3/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(feed.base_url, "https://example.test/api/v3");
    }
}
