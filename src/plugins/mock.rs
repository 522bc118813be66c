use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::ChainPlugin;
use crate::error::Error;
use crate::models::Chain;
use crate::Result;

/// Simulated chain for mock-mode plans and tests.
///
/// Swaps always succeed (unless toggled into failure mode), balances are
/// effectively unlimited, and USD conversion is 1:1.
pub struct MockPlugin {
    failing: AtomicBool,
    tx_counter: AtomicU64,
}

impl MockPlugin {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            tx_counter: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail with an ExternalChain error, to
    /// exercise the failure/recovery paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of swaps executed so far.
    pub fn swap_count(&self) -> u64 {
        self.tx_counter.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::ExternalChain("mock chain unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainPlugin for MockPlugin {
    fn chain(&self) -> Chain {
        Chain::Mock
    }

    async fn send_swap(&self, amount: Decimal, from_address: &str) -> Result<String> {
        self.check_available()?;
        let seq = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(%amount, from_address, "Mock swap executed");
        Ok(format!("mock-swap-{seq:08x}"))
    }

    async fn withdraw(&self, amount: Decimal, to_address: &str) -> Result<String> {
        self.check_available()?;
        let seq = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(%amount, to_address, "Mock withdrawal executed");
        Ok(format!("mock-withdraw-{seq:08x}"))
    }

    async fn get_balance(&self, _address: &str, _token: &str) -> Result<Decimal> {
        self.check_available()?;
        Ok(Decimal::new(1_000_000, 0))
    }

    async fn convert_to_usd(&self, amount: Decimal) -> Result<Decimal> {
        self.check_available()?;
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_swap_returns_unique_hashes() {
        let plugin = MockPlugin::new();
        let a = plugin.send_swap(dec!(10), "addr").await.unwrap();
        let b = plugin.send_swap(dec!(10), "addr").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(plugin.swap_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_toggle() {
        let plugin = MockPlugin::new();
        plugin.set_failing(true);

        let err = plugin.send_swap(dec!(10), "addr").await.unwrap_err();
        assert!(matches!(err, Error::ExternalChain(_)));

        plugin.set_failing(false);
        assert!(plugin.send_swap(dec!(10), "addr").await.is_ok());
    }

    #[tokio::test]
    async fn test_usd_conversion_is_identity() {
        let plugin = MockPlugin::new();
        assert_eq!(plugin.convert_to_usd(dec!(42.5)).await.unwrap(), dec!(42.5));
    }
}
