//! Persistence contract and its two implementations.
//!
//! The engine only assumes per-row atomic writes and compound-filter queries;
//! there are no cross-document transactions. Balance mutations are atomic
//! single-statement increments, with the sufficiency guard inside the debit.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    Allocation, AttemptCounts, BalanceEntry, Chain, InvestmentPlan, TransactionAttempt, User,
};
use crate::Result;

#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    // Plans
    async fn create_plan(&self, plan: &InvestmentPlan) -> Result<()>;
    async fn get_plan(&self, id: Uuid) -> Result<Option<InvestmentPlan>>;
    async fn update_plan(&self, plan: &InvestmentPlan) -> Result<()>;
    async fn list_active_plans(&self) -> Result<Vec<InvestmentPlan>>;
    /// Admin bulk-stop. Returns how many plans were deactivated.
    async fn deactivate_all_plans(&self) -> Result<u64>;

    // Attempts
    async fn create_attempt(&self, attempt: &TransactionAttempt) -> Result<()>;
    async fn get_attempt(&self, id: Uuid) -> Result<Option<TransactionAttempt>>;
    async fn update_attempt(&self, attempt: &TransactionAttempt) -> Result<()>;
    /// Recovery candidates: Failed with retries left, plus Pending attempts
    /// whose last activity predates `stuck_before`.
    async fn list_recovery_candidates(
        &self,
        stuck_before: DateTime<Utc>,
    ) -> Result<Vec<TransactionAttempt>>;
    async fn attempt_counts(&self) -> Result<AttemptCounts>;

    // Balances
    async fn get_balance(&self, user_id: Uuid, chain: Chain, token: &str) -> Result<Decimal>;
    /// Atomic increment; creates the row if missing.
    async fn credit_balance(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()>;
    /// Atomic decrement guarded by sufficiency; fails with
    /// InsufficientBalance instead of going negative.
    async fn debit_balance(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()>;
    async fn record_deposit(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()>;
    async fn record_withdrawal(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()>;
    async fn list_balances(&self, user_id: Uuid) -> Result<Vec<BalanceEntry>>;

    // Allocations
    async fn add_allocation(&self, user_id: Uuid, allocation: &Allocation) -> Result<()>;
    async fn list_allocations(&self, user_id: Uuid) -> Result<Vec<Allocation>>;
}
