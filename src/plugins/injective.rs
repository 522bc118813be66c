use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::ChainPlugin;
use crate::error::Error;
use crate::models::Chain;
use crate::Result;

/// Peggy-bridged USDT denom on Injective mainnet.
const USDT_DENOM: &str = "peggy0xdAC17F958D2ee523a2206206994597C13D831ec7";
const USDT_DECIMALS: u32 = 6;
const INJ_DECIMALS: u32 = 18;

/// Thin wrapper over an Injective trade gateway (LCD-style REST).
///
/// Amounts cross the wire as base-unit integer strings; this plugin owns the
/// scaling in both directions.
pub struct InjectivePlugin {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    txhash: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: CoinAmount,
}

#[derive(Debug, Deserialize)]
struct CoinAmount {
    #[allow(dead_code)]
    denom: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct OraclePriceResponse {
    price: String,
}

impl InjectivePlugin {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn denom_for(token: &str) -> String {
        match token {
            "INJ" => "inj".to_string(),
            "USDT" => USDT_DENOM.to_string(),
            other => other.to_lowercase(),
        }
    }

    fn decimals_for(denom: &str) -> u32 {
        if denom == "inj" {
            INJ_DECIMALS
        } else {
            USDT_DECIMALS
        }
    }

    fn to_base_units(amount: Decimal, decimals: u32) -> String {
        let scale = Decimal::from(10u64.pow(decimals));
        (amount * scale).trunc().to_string()
    }

    fn from_base_units(raw: &str, decimals: u32) -> Result<Decimal> {
        let units: Decimal = raw.parse().map_err(|_| Error::InvalidField {
            field: "amount",
            value: raw.to_string(),
        })?;
        Ok(units / Decimal::from(10u64.pow(decimals)))
    }

    async fn post_tx(&self, path: &str, body: serde_json::Value) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalChain(format!("injective: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::ExternalChain(format!(
                "injective gateway returned {status}: {text}"
            )));
        }

        let broadcast: BroadcastResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalChain(format!("injective: bad broadcast body: {e}")))?;
        Ok(broadcast.txhash)
    }
}

#[async_trait]
impl ChainPlugin for InjectivePlugin {
    fn chain(&self) -> Chain {
        Chain::Injective
    }

    async fn send_swap(&self, amount: Decimal, from_address: &str) -> Result<String> {
        let body = serde_json::json!({
            "sender": from_address,
            "quote_denom": USDT_DENOM,
            "quote_amount": Self::to_base_units(amount, USDT_DECIMALS),
        });
        let txhash = self.post_tx("/exchange/v1/swap", body).await?;
        tracing::info!(%amount, from_address, txhash, "Injective swap broadcast");
        Ok(txhash)
    }

    async fn withdraw(&self, amount: Decimal, to_address: &str) -> Result<String> {
        let body = serde_json::json!({
            "recipient": to_address,
            "denom": USDT_DENOM,
            "amount": Self::to_base_units(amount, USDT_DECIMALS),
        });
        self.post_tx("/exchange/v1/withdraw", body).await
    }

    async fn get_balance(&self, address: &str, token: &str) -> Result<Decimal> {
        let denom = Self::denom_for(token);
        let url = format!(
            "{}/cosmos/bank/v1beta1/balances/{}/by_denom?denom={}",
            self.base_url, address, denom
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ExternalChain(format!("injective: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ExternalChain(format!(
                "injective balance query returned {}",
                response.status()
            )));
        }

        let body: BalanceResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalChain(format!("injective: bad balance body: {e}")))?;
        Self::from_base_units(&body.balance.amount, Self::decimals_for(&denom))
    }

    async fn convert_to_usd(&self, amount: Decimal) -> Result<Decimal> {
        let url = format!("{}/oracle/v1beta1/price/inj", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ExternalChain(format!("injective: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ExternalChain(format!(
                "injective oracle returned {}",
                response.status()
            )));
        }

        let body: OraclePriceResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalChain(format!("injective: bad oracle body: {e}")))?;
        let rate: Decimal = body.price.parse().map_err(|_| Error::InvalidField {
            field: "price",
            value: body.price.clone(),
        })?;
        Ok(amount * rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_base_unit_scaling() {
        assert_eq!(
            InjectivePlugin::to_base_units(dec!(12.5), USDT_DECIMALS),
            "12500000"
        );
        // Sub-unit dust is truncated, never rounded up.
        assert_eq!(
            InjectivePlugin::to_base_units(dec!(0.0000019), USDT_DECIMALS),
            "1"
        );
        assert_eq!(
            InjectivePlugin::from_base_units("12500000", USDT_DECIMALS).unwrap(),
            dec!(12.5)
        );
    }

    #[test]
    fn test_denom_mapping() {
        assert_eq!(InjectivePlugin::denom_for("INJ"), "inj");
        assert_eq!(InjectivePlugin::denom_for("USDT"), USDT_DENOM);
        assert_eq!(InjectivePlugin::denom_for("ATOM"), "atom");
    }

    #[test]
    fn test_balance_response_parsing() {
        let raw = r#"{"balance":{"denom":"inj","amount":"2500000000000000000"}}"#;
        let parsed: BalanceResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            InjectivePlugin::from_base_units(&parsed.balance.amount, INJ_DECIMALS).unwrap(),
            dec!(2.5)
        );
    }

    #[test]
    fn test_bad_base_units_rejected() {
        assert!(InjectivePlugin::from_base_units("not-a-number", 6).is_err());
    }
}
