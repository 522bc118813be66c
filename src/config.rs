use serde::Deserialize;

use crate::Result;

/// Runtime settings, loaded from `dcabot.toml` (optional) and `DCABOT_*`
/// environment variables; env wins. Every field has a usable default so the
/// binary starts against local services out of the box.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    /// Optional; the engine runs without the price cache when unset or down.
    pub redis_url: Option<String>,
    pub price_api_base: String,
    pub price_api_key: Option<String>,
    /// All plans invest from this quote-denominated balance on their chain.
    pub quote_symbol: String,
    pub sweep_interval_secs: u64,
    pub pending_timeout_mins: i64,
    pub chains: ChainEndpoints,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainEndpoints {
    pub injective: String,
    pub aptos: String,
    pub sonic: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/dcabot".to_string(),
            redis_url: None,
            price_api_base: "https://api.coingecko.com/api/v3".to_string(),
            price_api_key: None,
            quote_symbol: "USDT".to_string(),
            sweep_interval_secs: 300,
            pending_timeout_mins: 10,
            chains: ChainEndpoints::default(),
        }
    }
}

impl Default for ChainEndpoints {
    fn default() -> Self {
        Self {
            injective: "https://sentry.lcd.injective.network".to_string(),
            aptos: "https://fullnode.mainnet.aptoslabs.com".to_string(),
            sonic: "https://api.mainnet-alpha.sonic.game".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("dcabot").required(false))
            .add_source(config::Environment::with_prefix("DCABOT").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}
