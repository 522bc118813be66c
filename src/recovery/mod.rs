//! Background sweep that retries stuck and failed attempts.
//!
//! The sweep runs on a fixed interval and picks up two kinds of work: Failed
//! attempts with retries left, and Pending attempts that have sat past the
//! staleness timeout (the service died mid-swap, or the chain call hung).
//! Each candidate is re-dispatched through its chain plugin; the attempt
//! record is mutated in place, so one plan execution has at most one attempt
//! row however many times it is retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::Store;
use crate::models::{AttemptKind, TransactionAttempt};
use crate::plugins::PluginRegistry;
use crate::Result;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const PENDING_TIMEOUT_MINS: i64 = 10;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub recovered: usize,
    pub failed_again: usize,
    /// Attempts whose owning plan no longer exists; marked terminally failed.
    pub abandoned: usize,
}

/// Attempt tallies plus the derived success ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    /// completed / total, 0.0 when there are no attempts at all.
    pub recovery_rate: f64,
}

pub struct RecoveryEngine {
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    quote_symbol: String,
    sweep_interval: Duration,
    pending_timeout: chrono::Duration,
}

impl RecoveryEngine {
    pub fn new(store: Arc<dyn Store>, registry: Arc<PluginRegistry>, quote_symbol: String) -> Self {
        Self {
            store,
            registry,
            quote_symbol,
            sweep_interval: SWEEP_INTERVAL,
            pending_timeout: chrono::Duration::minutes(PENDING_TIMEOUT_MINS),
        }
    }

    /// Override the sweep cadence and staleness cutoff. Used by tests.
    pub fn with_intervals(mut self, sweep_interval: Duration, pending_timeout_mins: i64) -> Self {
        self.sweep_interval = sweep_interval;
        self.pending_timeout = chrono::Duration::minutes(pending_timeout_mins);
        self
    }

    /// Spawn the sweep loop. The first sweep fires one full interval after
    /// startup, not immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.sweep_interval;
            let mut interval = tokio::time::interval_at(start, self.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                match self.sweep().await {
                    Ok(summary) if summary.scanned > 0 => {
                        tracing::info!(
                            scanned = summary.scanned,
                            recovered = summary.recovered,
                            failed_again = summary.failed_again,
                            abandoned = summary.abandoned,
                            "Recovery sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Recovery sweep failed: {e}");
                    }
                }
            }
        })
    }

    /// Run one sweep over the current candidate set.
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let cutoff = Utc::now() - self.pending_timeout;
        let candidates = self.store.list_recovery_candidates(cutoff).await?;

        let mut summary = SweepSummary {
            scanned: candidates.len(),
            ..SweepSummary::default()
        };

        for mut attempt in candidates {
            match self.retry_attempt(&mut attempt).await {
                RetryResult::Recovered => summary.recovered += 1,
                RetryResult::FailedAgain => summary.failed_again += 1,
                RetryResult::Abandoned => summary.abandoned += 1,
            }
        }

        Ok(summary)
    }

    async fn retry_attempt(&self, attempt: &mut TransactionAttempt) -> RetryResult {
        let now = Utc::now();

        // An attempt with no surviving plan can never complete its
        // bookkeeping; pin retry_count to the cap so it is never re-selected.
        let plan = match self.store.get_plan(attempt.plan_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                attempt.retry_count = attempt.max_retries;
                attempt.mark_failed("owning plan no longer exists".to_string(), now);
                if let Err(e) = self.store.update_attempt(attempt).await {
                    tracing::error!(attempt_id = %attempt.id, "Failed to abandon attempt: {e}");
                }
                tracing::warn!(
                    attempt_id = %attempt.id,
                    plan_id = %attempt.plan_id,
                    "Abandoning attempt, plan is gone"
                );
                return RetryResult::Abandoned;
            }
            Err(e) => {
                tracing::error!(attempt_id = %attempt.id, "Plan lookup failed: {e}");
                return RetryResult::FailedAgain;
            }
        };

        let user = match self.store.get_user(attempt.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) | Err(_) => {
                attempt.retry_count += 1;
                attempt.mark_failed("owning user not found".to_string(), now);
                let _ = self.store.update_attempt(attempt).await;
                return RetryResult::FailedAgain;
            }
        };

        let plugin = match self.registry.get(attempt.chain) {
            Ok(plugin) => plugin,
            Err(e) => {
                attempt.retry_count += 1;
                attempt.mark_failed(e.to_string(), now);
                let _ = self.store.update_attempt(attempt).await;
                return RetryResult::FailedAgain;
            }
        };

        // Dispatch by kind: buys re-spend the invested quote amount, sells
        // and generic swaps re-send the from-leg quantity.
        let dispatch = match attempt.kind {
            AttemptKind::Buy => plugin.send_swap(attempt.invested, &user.wallet_address).await,
            AttemptKind::Sell | AttemptKind::Swap => {
                plugin
                    .send_swap(attempt.from.amount, &user.wallet_address)
                    .await
            }
        };

        match dispatch {
            Ok(tx_hash) => {
                let now = Utc::now();
                attempt.mark_completed(tx_hash, now);
                if let Err(e) = self.store.update_attempt(attempt).await {
                    tracing::error!(attempt_id = %attempt.id, "Failed to persist recovery: {e}");
                    return RetryResult::FailedAgain;
                }

                // A recovered attempt gets the same settlement as a clean
                // tick: plan bookkeeping plus the ledger debit.
                let mut plan = plan;
                plan.record_execution(attempt.invested, now);
                if let Err(e) = self.store.update_plan(&plan).await {
                    tracing::error!(plan_id = %plan.id, "Failed to update plan after recovery: {e}");
                }
                if let Err(e) = self
                    .store
                    .debit_balance(
                        attempt.user_id,
                        attempt.chain,
                        &self.quote_symbol,
                        attempt.invested,
                    )
                    .await
                {
                    tracing::error!(
                        attempt_id = %attempt.id,
                        "Ledger debit failed after recovery: {e}"
                    );
                }

                tracing::info!(
                    attempt_id = %attempt.id,
                    plan_id = %plan.id,
                    retry = attempt.retry_count,
                    "Attempt recovered"
                );
                RetryResult::Recovered
            }
            Err(e) => {
                attempt.retry_count += 1;
                attempt.mark_failed(e.to_string(), Utc::now());
                if let Err(persist_err) = self.store.update_attempt(attempt).await {
                    tracing::error!(
                        attempt_id = %attempt.id,
                        "Failed to persist retry failure: {persist_err}"
                    );
                }

                tracing::warn!(
                    attempt_id = %attempt.id,
                    retry = attempt.retry_count,
                    max = attempt.max_retries,
                    "Retry failed: {e}"
                );
                RetryResult::FailedAgain
            }
        }
    }

    /// Current attempt tallies and the overall recovery rate.
    pub async fn stats(&self) -> Result<RecoveryStats> {
        let counts = self.store.attempt_counts().await?;
        let total = counts.pending + counts.completed + counts.failed + counts.retrying;
        let recovery_rate = if total == 0 {
            0.0
        } else {
            counts.completed as f64 / total as f64
        };

        Ok(RecoveryStats {
            pending: counts.pending,
            completed: counts.completed,
            failed: counts.failed,
            retrying: counts.retrying,
            recovery_rate,
        })
    }
}

enum RetryResult {
    Recovered,
    FailedAgain,
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{
        AttemptLeg, AttemptStatus, Chain, Frequency, InvestmentPlan, RiskLevel, User,
    };
    use crate::plugins::MockPlugin;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        mock: Arc<MockPlugin>,
        engine: RecoveryEngine,
        user: User,
        plan: InvestmentPlan,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PluginRegistry::new());
        let mock = Arc::new(MockPlugin::new());
        registry.register(Chain::Mock, mock.clone());

        let user = User::new("mock-wallet".to_string());
        store.create_user(&user).await.unwrap();
        store
            .credit_balance(user.id, Chain::Mock, "USDT", dec!(10000))
            .await
            .unwrap();

        let plan = InvestmentPlan::new(
            user.id,
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        );
        store.create_plan(&plan).await.unwrap();

        let engine = RecoveryEngine::new(
            store.clone() as Arc<dyn Store>,
            registry,
            "USDT".to_string(),
        )
        .with_intervals(Duration::from_secs(1), 10);

        Fixture {
            store,
            mock,
            engine,
            user,
            plan,
        }
    }

    fn failed_attempt(plan: &InvestmentPlan) -> TransactionAttempt {
        let mut attempt = TransactionAttempt::new(
            plan,
            AttemptKind::Buy,
            AttemptLeg {
                token: "USDT".to_string(),
                amount: dec!(100),
            },
            AttemptLeg {
                token: "INJ".to_string(),
                amount: dec!(4),
            },
            25.0,
            dec!(100),
        );
        attempt.mark_failed("rpc timeout".to_string(), Utc::now());
        attempt
    }

    #[tokio::test]
    async fn test_sweep_recovers_failed_attempt() {
        let f = fixture().await;
        let attempt = failed_attempt(&f.plan);
        f.store.create_attempt(&attempt).await.unwrap();

        let summary = f.engine.sweep().await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.recovered, 1);

        let recovered = f.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, AttemptStatus::Completed);
        assert!(recovered.tx_hash.is_some());

        // Settlement mirrors a clean tick.
        let plan = f.store.get_plan(f.plan.id).await.unwrap().unwrap();
        assert_eq!(plan.execution_count, 1);
        assert_eq!(plan.total_invested, dec!(100));
        assert_eq!(plan.initial_amount, Some(dec!(100)));
        let balance = f
            .store
            .get_balance(f.user.id, Chain::Mock, "USDT")
            .await
            .unwrap();
        assert_eq!(balance, dec!(9900));
    }

    #[tokio::test]
    async fn test_failed_retry_increments_count() {
        let f = fixture().await;
        f.mock.set_failing(true);

        let attempt = failed_attempt(&f.plan);
        f.store.create_attempt(&attempt).await.unwrap();

        let summary = f.engine.sweep().await.unwrap();
        assert_eq!(summary.failed_again, 1);

        let updated = f.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(updated.status, AttemptStatus::Failed);
        assert_eq!(updated.retry_count, 1);
    }

    #[tokio::test]
    async fn test_retries_stop_at_cap() {
        let f = fixture().await;
        f.mock.set_failing(true);

        let attempt = failed_attempt(&f.plan);
        f.store.create_attempt(&attempt).await.unwrap();

        for _ in 0..attempt.max_retries {
            f.engine.sweep().await.unwrap();
        }

        let exhausted = f.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(exhausted.retry_count, exhausted.max_retries);

        // No retries left: the next sweep must not touch it.
        let summary = f.engine.sweep().await.unwrap();
        assert_eq!(summary.scanned, 0);
    }

    #[tokio::test]
    async fn test_orphaned_attempt_is_abandoned() {
        let f = fixture().await;

        let ghost_plan = InvestmentPlan::new(
            f.user.id,
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        );
        // Never persisted, so the attempt points at a missing plan.
        let attempt = failed_attempt(&ghost_plan);
        f.store.create_attempt(&attempt).await.unwrap();

        let summary = f.engine.sweep().await.unwrap();
        assert_eq!(summary.abandoned, 1);

        let abandoned = f.store.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(abandoned.status, AttemptStatus::Failed);
        assert_eq!(abandoned.retry_count, abandoned.max_retries);
        assert!(abandoned
            .error
            .as_deref()
            .is_some_and(|e| e.contains("no longer exists")));

        // Terminal: subsequent sweeps skip it.
        let summary = f.engine.sweep().await.unwrap();
        assert_eq!(summary.scanned, 0);
    }

    #[tokio::test]
    async fn test_stale_pending_attempt_is_swept() {
        let f = fixture().await;

        let mut attempt = failed_attempt(&f.plan);
        attempt.status = AttemptStatus::Pending;
        attempt.error = None;
        attempt.last_attempt_time = Utc::now() - chrono::Duration::minutes(30);
        f.store.create_attempt(&attempt).await.unwrap();

        let summary = f.engine.sweep().await.unwrap();
        assert_eq!(summary.recovered, 1);
    }

    #[tokio::test]
    async fn test_stats_recovery_rate() {
        let f = fixture().await;

        assert_eq!(f.engine.stats().await.unwrap().recovery_rate, 0.0);

        let attempt = failed_attempt(&f.plan);
        f.store.create_attempt(&attempt).await.unwrap();
        f.engine.sweep().await.unwrap();

        let mut still_failed = failed_attempt(&f.plan);
        still_failed.id = Uuid::new_v4();
        still_failed.retry_count = still_failed.max_retries;
        f.store.create_attempt(&still_failed).await.unwrap();

        let stats = f.engine.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.retrying, 1);
        assert!((stats.recovery_rate - 0.5).abs() < 1e-9);
    }
}
