use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::Store;
use crate::error::Error;
use crate::models::{
    Allocation, AttemptCounts, AttemptStatus, BalanceEntry, Chain, InvestmentPlan,
    TransactionAttempt, User,
};
use crate::Result;

type BalanceKey = (Uuid, Chain, String);

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    plans: HashMap<Uuid, InvestmentPlan>,
    attempts: HashMap<Uuid, TransactionAttempt>,
    balances: HashMap<BalanceKey, BalanceEntry>,
    allocations: HashMap<Uuid, Vec<Allocation>>,
}

/// In-memory store for tests and simulated runs. Same semantics as the
/// Postgres store, including the in-place sufficiency guard on debits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens after a panic in another test thread;
        // propagating it here would just mask the original failure.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        self.lock().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn create_plan(&self, plan: &InvestmentPlan) -> Result<()> {
        self.lock().plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<InvestmentPlan>> {
        Ok(self.lock().plans.get(&id).cloned())
    }

    async fn update_plan(&self, plan: &InvestmentPlan) -> Result<()> {
        self.lock().plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn list_active_plans(&self) -> Result<Vec<InvestmentPlan>> {
        let mut plans: Vec<InvestmentPlan> = self
            .lock()
            .plans
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn deactivate_all_plans(&self) -> Result<u64> {
        let mut inner = self.lock();
        let mut count = 0;
        for plan in inner.plans.values_mut() {
            if plan.is_active {
                plan.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn create_attempt(&self, attempt: &TransactionAttempt) -> Result<()> {
        self.lock().attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<TransactionAttempt>> {
        Ok(self.lock().attempts.get(&id).cloned())
    }

    async fn update_attempt(&self, attempt: &TransactionAttempt) -> Result<()> {
        self.lock().attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn list_recovery_candidates(
        &self,
        stuck_before: DateTime<Utc>,
    ) -> Result<Vec<TransactionAttempt>> {
        let mut candidates: Vec<TransactionAttempt> = self
            .lock()
            .attempts
            .values()
            .filter(|a| match a.status {
                AttemptStatus::Failed => a.retry_count < a.max_retries,
                AttemptStatus::Pending => a.last_attempt_time < stuck_before,
                AttemptStatus::Completed => false,
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|a| a.last_attempt_time);
        Ok(candidates)
    }

    async fn attempt_counts(&self) -> Result<AttemptCounts> {
        let inner = self.lock();
        let mut counts = AttemptCounts::default();
        for attempt in inner.attempts.values() {
            match attempt.status {
                AttemptStatus::Pending => counts.pending += 1,
                AttemptStatus::Completed => counts.completed += 1,
                AttemptStatus::Failed if attempt.retry_count > 0 => counts.retrying += 1,
                AttemptStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn get_balance(&self, user_id: Uuid, chain: Chain, token: &str) -> Result<Decimal> {
        Ok(self
            .lock()
            .balances
            .get(&(user_id, chain, token.to_string()))
            .map(|entry| entry.balance)
            .unwrap_or(Decimal::ZERO))
    }

    async fn credit_balance(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner
            .balances
            .entry((user_id, chain, token.to_string()))
            .or_insert_with(|| BalanceEntry {
                chain,
                token_symbol: token.to_string(),
                balance: Decimal::ZERO,
                last_updated: Utc::now(),
            });
        entry.balance += amount;
        entry.last_updated = Utc::now();
        Ok(())
    }

    async fn debit_balance(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        let mut inner = self.lock();
        let available = inner
            .balances
            .get(&(user_id, chain, token.to_string()))
            .map(|entry| entry.balance)
            .unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(Error::InsufficientBalance {
                required: amount,
                available,
            });
        }

        if let Some(entry) = inner.balances.get_mut(&(user_id, chain, token.to_string())) {
            entry.balance -= amount;
            entry.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn record_deposit(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        self.credit_balance(user_id, chain, token, amount).await?;
        if let Some(user) = self.lock().users.get_mut(&user_id) {
            user.total_deposited += amount;
        }
        Ok(())
    }

    async fn record_withdrawal(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        self.debit_balance(user_id, chain, token, amount).await?;
        if let Some(user) = self.lock().users.get_mut(&user_id) {
            user.total_withdrawn += amount;
        }
        Ok(())
    }

    async fn list_balances(&self, user_id: Uuid) -> Result<Vec<BalanceEntry>> {
        let mut entries: Vec<BalanceEntry> = self
            .lock()
            .balances
            .iter()
            .filter(|((id, _, _), _)| *id == user_id)
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| {
            (a.chain.as_str(), &a.token_symbol).cmp(&(b.chain.as_str(), &b.token_symbol))
        });
        Ok(entries)
    }

    async fn add_allocation(&self, user_id: Uuid, allocation: &Allocation) -> Result<()> {
        self.lock()
            .allocations
            .entry(user_id)
            .or_default()
            .push(allocation.clone());
        Ok(())
    }

    async fn list_allocations(&self, user_id: Uuid) -> Result<Vec<Allocation>> {
        Ok(self
            .lock()
            .allocations
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}
