use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::ChainPlugin;
use crate::error::Error;
use crate::models::Chain;
use crate::Result;

/// Thin wrapper over a Sonic (Solana-SVM) JSON-RPC gateway.
pub struct SonicPlugin {
    client: reqwest::Client,
    rpc_url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SignatureResult {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct TokenAmountResult {
    #[serde(rename = "uiAmountString")]
    ui_amount_string: String,
}

#[derive(Debug, Deserialize)]
struct UsdRateResult {
    rate: f64,
}

impl SonicPlugin {
    pub fn new(rpc_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url,
        }
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalChain(format!("sonic: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ExternalChain(format!(
                "sonic rpc returned {}",
                response.status()
            )));
        }

        let rpc: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::ExternalChain(format!("sonic: bad rpc body: {e}")))?;

        if let Some(err) = rpc.error {
            return Err(Error::ExternalChain(format!(
                "sonic rpc error {}: {}",
                err.code, err.message
            )));
        }
        rpc.result
            .ok_or_else(|| Error::ExternalChain("sonic rpc returned no result".to_string()))
    }
}

#[async_trait]
impl ChainPlugin for SonicPlugin {
    fn chain(&self) -> Chain {
        Chain::Sonic
    }

    async fn send_swap(&self, amount: Decimal, from_address: &str) -> Result<String> {
        let result: SignatureResult = self
            .rpc_call(
                "sendSwap",
                serde_json::json!([from_address, amount.to_string(), "USDT"]),
            )
            .await?;
        tracing::info!(%amount, from_address, signature = result.signature, "Sonic swap sent");
        Ok(result.signature)
    }

    async fn withdraw(&self, amount: Decimal, to_address: &str) -> Result<String> {
        let result: SignatureResult = self
            .rpc_call(
                "sendWithdraw",
                serde_json::json!([to_address, amount.to_string(), "USDT"]),
            )
            .await?;
        Ok(result.signature)
    }

    async fn get_balance(&self, address: &str, token: &str) -> Result<Decimal> {
        let result: TokenAmountResult = self
            .rpc_call("getTokenBalance", serde_json::json!([address, token]))
            .await?;
        result
            .ui_amount_string
            .parse()
            .map_err(|_| Error::InvalidField {
                field: "amount",
                value: result.ui_amount_string.clone(),
            })
    }

    async fn convert_to_usd(&self, amount: Decimal) -> Result<Decimal> {
        let result: UsdRateResult = self
            .rpc_call("getUsdRate", serde_json::json!(["SONIC"]))
            .await?;
        let rate = Decimal::from_f64(result.rate).ok_or_else(|| Error::InvalidField {
            field: "rate",
            value: result.rate.to_string(),
        })?;
        Ok(amount * rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_result_parsing() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{"signature":"5Kd7zx"}}"#;
        let parsed: RpcResponse<SignatureResult> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result.unwrap().signature, "5Kd7zx");
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_rpc_error_parsing() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"blockhash expired"}}"#;
        let parsed: RpcResponse<SignatureResult> = serde_json::from_str(raw).unwrap();
        let err = parsed.error.unwrap();
        assert_eq!(err.code, -32000);
        assert!(err.message.contains("blockhash"));
    }

    #[test]
    fn test_token_amount_parsing() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{"uiAmountString":"123.456789"}}"#;
        let parsed: RpcResponse<TokenAmountResult> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result.unwrap().ui_amount_string, "123.456789");
    }
}
