use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;

use crate::analyzer::PriceSample;
use crate::error::Error;
use crate::Result;

const RATE_LIMIT_RPM: u32 = 30; // Demo API tier: 30 requests per minute
const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type FeedRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Source of market price data, keyed by the provider's coin identifier
/// (e.g. "injective-protocol", "aptos").
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Hourly (or finer) samples covering the last `days` days, oldest first.
    async fn fetch_history(&self, token_id: &str, days: u32) -> Result<Vec<PriceSample>>;

    /// Current USD spot price.
    async fn spot_price(&self, token_id: &str) -> Result<f64>;
}

/// CoinGecko-compatible REST client with rate limiting and retry.
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct HttpPriceFeed {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<FeedRateLimiter>,
}

/// Response from /coins/{id}/market_chart
#[derive(Debug, Deserialize)]
struct MarketChartData {
    prices: Vec<[f64; 2]>, // [timestamp_ms, price]
}

impl HttpPriceFeed {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let rpm = NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url,
            api_key,
            rate_limiter,
        })
    }

    fn with_key(&self, url: String) -> String {
        match &self.api_key {
            Some(key) => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{url}{sep}x_cg_demo_api_key={key}")
            }
            None => url,
        }
    }

    /// Rate-limited GET with exponential backoff on 429 and 5xx.
    async fn make_request(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Price API returned {}, backing off for {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    // Other 4xx errors are not retryable.
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(Error::PriceFeed(format!("{status}: {error_text}")));
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => {
                    return Err(Error::PriceFeed(format!(
                        "network error after {MAX_RETRIES} retries: {e}"
                    )))
                }
            }
        }

        Err(Error::PriceFeed(format!("failed after {MAX_RETRIES} retries")))
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn fetch_history(&self, token_id: &str, days: u32) -> Result<Vec<PriceSample>> {
        let url = self.with_key(format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}",
            self.base_url, token_id, days
        ));

        let response = self.make_request(&url).await?;
        let data: MarketChartData = response
            .json()
            .await
            .map_err(|e| Error::PriceFeed(format!("bad market chart body: {e}")))?;

        let samples = data
            .prices
            .into_iter()
            .filter_map(|[timestamp_ms, price]| {
                chrono::DateTime::from_timestamp_millis(timestamp_ms as i64)
                    .map(|timestamp| PriceSample { timestamp, price })
            })
            .collect::<Vec<_>>();

        tracing::debug!("Fetched {} price points for {}", samples.len(), token_id);
        Ok(samples)
    }

    async fn spot_price(&self, token_id: &str) -> Result<f64> {
        let url = self.with_key(format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, token_id
        ));

        let response = self.make_request(&url).await?;
        let body: HashMap<String, HashMap<String, f64>> = response
            .json()
            .await
            .map_err(|e| Error::PriceFeed(format!("bad spot price body: {e}")))?;

        body.get(token_id)
            .and_then(|prices| prices.get("usd"))
            .copied()
            .ok_or_else(|| Error::PriceFeed(format!("no usd price for {token_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_history_parses_market_chart() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/coins/injective-protocol/market_chart?vs_currency=usd&days=30",
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"prices":[[1700000000000,24.5],[1700003600000,25.1]],
                    "total_volumes":[[1700000000000,1.0],[1700003600000,2.0]]}"#,
            )
            .create_async()
            .await;

        let feed = HttpPriceFeed::new(server.url(), None).unwrap();
        let samples = feed.fetch_history("injective-protocol", 30).await.unwrap();

        mock.assert_async().await;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp.timestamp(), 1_700_000_000);
        assert_eq!(samples[0].price, 24.5);
        assert_eq!(samples[1].price, 25.1);
    }

    #[tokio::test]
    async fn test_spot_price_parses_simple_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price?ids=aptos&vs_currencies=usd")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"aptos":{"usd":8.42}}"#)
            .create_async()
            .await;

        let feed = HttpPriceFeed::new(server.url(), None).unwrap();
        let price = feed.spot_price("aptos").await.unwrap();

        mock.assert_async().await;
        assert_eq!(price, 8.42);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price?ids=nope&vs_currencies=usd")
            .with_status(404)
            .with_body("coin not found")
            .expect(1)
            .create_async()
            .await;

        let feed = HttpPriceFeed::new(server.url(), None).unwrap();
        let err = feed.spot_price("nope").await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, Error::PriceFeed(_)));
    }

    #[tokio::test]
    async fn test_api_key_appended_as_query_param() {
        let feed = HttpPriceFeed::new(
            "https://example.invalid".to_string(),
            Some("demo-key".to_string()),
        )
        .unwrap();

        let url = feed.with_key("https://example.invalid/simple/price?ids=x".to_string());
        assert!(url.ends_with("&x_cg_demo_api_key=demo-key"));

        let bare = feed.with_key("https://example.invalid/ping".to_string());
        assert!(bare.ends_with("?x_cg_demo_api_key=demo-key"));
    }
}
