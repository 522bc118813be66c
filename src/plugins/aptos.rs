use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::ChainPlugin;
use crate::error::Error;
use crate::models::Chain;
use crate::Result;

const APT_COIN_TYPE: &str = "0x1::aptos_coin::AptosCoin";
const USDT_COIN_TYPE: &str =
    "0xf22bede237a07e121b56d91a491eb7bcdfd1f5907926a9e58338f964a01b17fa::asset::USDT";
const APT_DECIMALS: u32 = 8;
const USDT_DECIMALS: u32 = 6;

/// Thin wrapper over an Aptos fullnode-compatible gateway.
///
/// Transactions are submitted as entry-function payloads; balances come from
/// the CoinStore resource of the queried account.
pub struct AptosPlugin {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct CoinStoreResource {
    data: CoinStoreData,
}

#[derive(Debug, Deserialize)]
struct CoinStoreData {
    coin: CoinValue,
}

#[derive(Debug, Deserialize)]
struct CoinValue {
    value: String,
}

impl AptosPlugin {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn coin_type_for(token: &str) -> &'static str {
        match token {
            "APT" => APT_COIN_TYPE,
            _ => USDT_COIN_TYPE,
        }
    }

    fn decimals_for(coin_type: &str) -> u32 {
        if coin_type == APT_COIN_TYPE {
            APT_DECIMALS
        } else {
            USDT_DECIMALS
        }
    }

    fn to_units(amount: Decimal, decimals: u32) -> String {
        (amount * Decimal::from(10u64.pow(decimals)))
            .trunc()
            .to_string()
    }

    fn from_units(raw: &str, decimals: u32) -> Result<Decimal> {
        let units: Decimal = raw.parse().map_err(|_| Error::InvalidField {
            field: "amount",
            value: raw.to_string(),
        })?;
        Ok(units / Decimal::from(10u64.pow(decimals)))
    }

    async fn submit_entry_function(
        &self,
        function: &str,
        type_arguments: Vec<&str>,
        arguments: Vec<serde_json::Value>,
    ) -> Result<String> {
        let url = format!("{}/v1/transactions", self.base_url);
        let body = serde_json::json!({
            "type": "entry_function_payload",
            "function": function,
            "type_arguments": type_arguments,
            "arguments": arguments,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalChain(format!("aptos: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::ExternalChain(format!(
                "aptos node returned {status}: {text}"
            )));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalChain(format!("aptos: bad submit body: {e}")))?;
        Ok(submitted.hash)
    }
}

#[async_trait]
impl ChainPlugin for AptosPlugin {
    fn chain(&self) -> Chain {
        Chain::Aptos
    }

    async fn send_swap(&self, amount: Decimal, from_address: &str) -> Result<String> {
        let hash = self
            .submit_entry_function(
                "0x1::dca_router::swap_exact_in",
                vec![USDT_COIN_TYPE, APT_COIN_TYPE],
                vec![
                    serde_json::json!(from_address),
                    serde_json::json!(Self::to_units(amount, USDT_DECIMALS)),
                ],
            )
            .await?;
        tracing::info!(%amount, from_address, hash, "Aptos swap submitted");
        Ok(hash)
    }

    async fn withdraw(&self, amount: Decimal, to_address: &str) -> Result<String> {
        self.submit_entry_function(
            "0x1::coin::transfer",
            vec![USDT_COIN_TYPE],
            vec![
                serde_json::json!(to_address),
                serde_json::json!(Self::to_units(amount, USDT_DECIMALS)),
            ],
        )
        .await
    }

    async fn get_balance(&self, address: &str, token: &str) -> Result<Decimal> {
        let coin_type = Self::coin_type_for(token);
        let url = format!(
            "{}/v1/accounts/{}/resource/0x1::coin::CoinStore<{}>",
            self.base_url, address, coin_type
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ExternalChain(format!("aptos: {e}")))?;

        // A missing CoinStore resource means the account never held the coin.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Decimal::ZERO);
        }
        if !response.status().is_success() {
            return Err(Error::ExternalChain(format!(
                "aptos balance query returned {}",
                response.status()
            )));
        }

        let resource: CoinStoreResource = response
            .json()
            .await
            .map_err(|e| Error::ExternalChain(format!("aptos: bad resource body: {e}")))?;
        Self::from_units(&resource.data.coin.value, Self::decimals_for(coin_type))
    }

    async fn convert_to_usd(&self, amount: Decimal) -> Result<Decimal> {
        let url = format!("{}/v1/view", self.base_url);
        let body = serde_json::json!({
            "function": "0x1::oracle::apt_usd_price",
            "type_arguments": [],
            "arguments": [],
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalChain(format!("aptos: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ExternalChain(format!(
                "aptos view call returned {}",
                response.status()
            )));
        }

        // View functions return a positional array of results.
        let values: Vec<String> = response
            .json()
            .await
            .map_err(|e| Error::ExternalChain(format!("aptos: bad view body: {e}")))?;
        let raw = values.first().ok_or_else(|| {
            Error::ExternalChain("aptos view call returned no values".to_string())
        })?;
        let rate: Decimal = raw.parse().map_err(|_| Error::InvalidField {
            field: "price",
            value: raw.clone(),
        })?;
        Ok(amount * rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_octa_scaling() {
        assert_eq!(AptosPlugin::to_units(dec!(1.5), APT_DECIMALS), "150000000");
        assert_eq!(
            AptosPlugin::from_units("150000000", APT_DECIMALS).unwrap(),
            dec!(1.5)
        );
    }

    #[test]
    fn test_coin_type_mapping() {
        assert_eq!(AptosPlugin::coin_type_for("APT"), APT_COIN_TYPE);
        assert_eq!(AptosPlugin::coin_type_for("USDT"), USDT_COIN_TYPE);
        assert_eq!(AptosPlugin::decimals_for(APT_COIN_TYPE), 8);
        assert_eq!(AptosPlugin::decimals_for(USDT_COIN_TYPE), 6);
    }

    #[test]
    fn test_coin_store_parsing() {
        let raw = r#"{"data":{"coin":{"value":"250000000"}}}"#;
        let parsed: CoinStoreResource = serde_json::from_str(raw).unwrap();
        assert_eq!(
            AptosPlugin::from_units(&parsed.data.coin.value, APT_DECIMALS).unwrap(),
            dec!(2.5)
        );
    }
}
