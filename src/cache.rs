use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use crate::analyzer::PriceSample;
use crate::error::Error;
use crate::Result;

/// Price-sample cache contract: save fetched history, read it back on feed
/// failure, and trim stale entries so the backing store stays bounded.
#[async_trait]
pub trait SampleCache: Send + Sync {
    async fn save_samples(&self, token: &str, samples: &[PriceSample]) -> Result<()>;

    /// Samples from the last `hours_back` hours, oldest first.
    async fn load_samples(&self, token: &str, hours_back: u64) -> Result<Vec<PriceSample>>;

    /// Drop samples older than `keep_hours`. Returns how many were removed.
    async fn cleanup_old(&self, token: &str, keep_hours: u64) -> Result<usize>;
}

/// Redis cache of price history, used as the fallback when the price feed is
/// down at tick time.
///
/// Uses sorted sets with timestamps as scores for efficient time-range
/// queries.
pub struct PriceCache {
    conn: ConnectionManager,
}

impl PriceCache {
    /// Connect to Redis. Times out after 5 seconds rather than hanging the
    /// startup sequence.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| Error::CacheTimeout)??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(token: &str) -> String {
        format!("prices:{}", token)
    }
}

#[async_trait]
impl SampleCache for PriceCache {
    /// Save samples into the sorted set `prices:{token}` keyed by timestamp.
    /// Re-saving a timestamp overwrites it, so repeated fetches stay
    /// duplicate-free.
    async fn save_samples(&self, token: &str, samples: &[PriceSample]) -> Result<()> {
        let key = Self::key(token);
        let mut conn = self.conn.clone();

        for sample in samples {
            let value = serde_json::to_string(sample)?;
            let score = sample.timestamp.timestamp() as f64;
            conn.zadd::<_, _, _, ()>(&key, value, score).await?;
        }

        tracing::debug!("Cached {} price samples for {}", samples.len(), token);
        Ok(())
    }

    async fn load_samples(&self, token: &str, hours_back: u64) -> Result<Vec<PriceSample>> {
        let key = Self::key(token);
        let mut conn = self.conn.clone();

        let cutoff = Utc::now() - chrono::Duration::hours(hours_back as i64);
        let min_score = cutoff.timestamp() as f64;

        let results: Vec<String> = conn.zrangebyscore(&key, min_score, "+inf").await?;

        let mut samples = Vec::with_capacity(results.len());
        for json_str in results {
            samples.push(serde_json::from_str(&json_str)?);
        }

        tracing::debug!("Loaded {} cached price samples for {}", samples.len(), token);
        Ok(samples)
    }

    async fn cleanup_old(&self, token: &str, keep_hours: u64) -> Result<usize> {
        let key = Self::key(token);
        let mut conn = self.conn.clone();

        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours as i64);
        let max_score = cutoff.timestamp() as f64;

        let removed: usize = conn.zrembyscore(&key, "-inf", max_score).await?;

        if removed > 0 {
            tracing::debug!("Removed {} stale price samples for {}", removed, token);
        }
        Ok(removed)
    }
}
