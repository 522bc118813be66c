//! Internal balance accounting over the persistence layer.
//!
//! The ledger is the one place the engine adds or removes user funds.
//! Executions debit through here, deposits credit through here, and a
//! withdrawal is the only operation that also grows `total_withdrawn`.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Store;
use crate::error::Error;
use crate::models::{Allocation, BalanceEntry, Chain};
use crate::Result;

pub struct BalanceLedger {
    store: Arc<dyn Store>,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn available(&self, user_id: Uuid, chain: Chain, token: &str) -> Result<Decimal> {
        self.store.get_balance(user_id, chain, token).await
    }

    pub async fn deposit(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidField {
                field: "amount",
                value: amount.to_string(),
            });
        }
        if self.store.get_user(user_id).await?.is_none() {
            return Err(Error::UserNotFound(user_id));
        }
        self.store
            .record_deposit(user_id, chain, token, amount)
            .await
    }

    pub async fn withdraw(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidField {
                field: "amount",
                value: amount.to_string(),
            });
        }
        self.store
            .record_withdrawal(user_id, chain, token, amount)
            .await
    }

    /// Earmark funds for a strategy. The amount is debited from the user's
    /// quote balance on that chain so it cannot be double-spent by ticks.
    pub async fn allocate(
        &self,
        user_id: Uuid,
        token: &str,
        allocation: Allocation,
    ) -> Result<()> {
        self.store
            .debit_balance(user_id, allocation.chain, token, allocation.amount)
            .await?;
        self.store.add_allocation(user_id, &allocation).await
    }

    pub async fn balances(&self, user_id: Uuid) -> Result<Vec<BalanceEntry>> {
        self.store.list_balances(user_id).await
    }

    pub async fn allocations(&self, user_id: Uuid) -> Result<Vec<Allocation>> {
        self.store.list_allocations(user_id).await
    }
}
