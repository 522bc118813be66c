//! Chain capability plugins.
//!
//! Each chain exposes the same narrow capability set behind [`ChainPlugin`];
//! the registry is a plain dispatch map keyed by [`Chain`]. Retrying a failed
//! call is the recovery engine's job, never the plugin's.

pub mod aptos;
pub mod injective;
pub mod mock;
pub mod registry;
pub mod sonic;

pub use mock::MockPlugin;
pub use registry::PluginRegistry;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::Chain;
use crate::Result;

#[async_trait]
pub trait ChainPlugin: Send + Sync {
    fn chain(&self) -> Chain;

    /// Swap `amount` of the quote currency into the chain's target token.
    /// Returns the transaction hash.
    async fn send_swap(&self, amount: Decimal, from_address: &str) -> Result<String>;

    /// Withdraw `amount` of the quote currency to an external address.
    async fn withdraw(&self, amount: Decimal, to_address: &str) -> Result<String>;

    /// On-chain balance of `token` held by `address`.
    async fn get_balance(&self, address: &str, token: &str) -> Result<Decimal>;

    /// Convert a native-token amount to USD at the chain's reference rate.
    async fn convert_to_usd(&self, amount: Decimal) -> Result<Decimal>;
}
