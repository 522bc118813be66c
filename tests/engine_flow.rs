//! End-to-end engine flow over the in-memory store and mock chain.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use dcabot::analyzer::PriceSample;
use dcabot::api::PriceFeed;
use dcabot::db::{MemoryStore, Store};
use dcabot::models::{Chain, Frequency, RiskLevel, User};
use dcabot::plugins::{MockPlugin, PluginRegistry};
use dcabot::recovery::RecoveryEngine;
use dcabot::scheduler::{PlanScheduler, TickOutcome};
use dcabot::Result;

/// Deterministic feed: a flat 31-day price series at a fixed spot price.
struct FlatFeed {
    price: f64,
}

#[async_trait]
impl PriceFeed for FlatFeed {
    async fn fetch_history(&self, _token_id: &str, days: u32) -> Result<Vec<PriceSample>> {
        let now = Utc::now();
        let hours = (days as i64) * 24;
        Ok((0..=hours)
            .map(|h| PriceSample {
                timestamp: now - Duration::hours(hours - h),
                price: self.price,
            })
            .collect())
    }

    async fn spot_price(&self, _token_id: &str) -> Result<f64> {
        Ok(self.price)
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    mock: Arc<MockPlugin>,
    scheduler: Arc<PlanScheduler>,
    recovery: RecoveryEngine,
    user: User,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(PluginRegistry::new());
    let mock = Arc::new(MockPlugin::new());
    registry.register(Chain::Mock, mock.clone());

    let feed = Arc::new(FlatFeed { price: 25.0 });

    let user = User::new("mock-wallet".to_string());
    store.create_user(&user).await.unwrap();

    let scheduler = Arc::new(PlanScheduler::new(
        store.clone() as Arc<dyn Store>,
        registry.clone(),
        feed,
        None,
        "USDT".to_string(),
    ));
    let recovery = RecoveryEngine::new(
        store.clone() as Arc<dyn Store>,
        registry,
        "USDT".to_string(),
    )
    .with_intervals(std::time::Duration::from_secs(1), 10);

    Harness {
        store,
        mock,
        scheduler,
        recovery,
        user,
    }
}

#[tokio::test]
async fn no_risk_plan_invests_the_nominal_amount_every_tick() {
    let h = harness().await;
    h.store
        .record_deposit(h.user.id, Chain::Mock, "USDT", dec!(1000))
        .await
        .unwrap();

    let plan = h
        .scheduler
        .create_plan(
            h.user.id,
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        )
        .await
        .unwrap();

    let first = h.scheduler.tick_once(plan.id).await.unwrap();
    assert_eq!(first, TickOutcome::Executed(dec!(100)));

    let after_first = h.store.get_plan(plan.id).await.unwrap().unwrap();
    assert_eq!(after_first.execution_count, 1);
    assert_eq!(after_first.initial_amount, Some(dec!(100)));
    assert_eq!(after_first.total_invested, dec!(100));

    // With no risk the sizing collapses to the initial amount, so the second
    // tick is deterministic despite the analyzer's randomness.
    let second = h.scheduler.tick_once(plan.id).await.unwrap();
    assert_eq!(second, TickOutcome::Executed(dec!(100)));

    let after_second = h.store.get_plan(plan.id).await.unwrap().unwrap();
    assert_eq!(after_second.execution_count, 2);
    assert_eq!(after_second.initial_amount, Some(dec!(100)));
    assert_eq!(after_second.total_invested, dec!(200));

    let balance = h
        .store
        .get_balance(h.user.id, Chain::Mock, "USDT")
        .await
        .unwrap();
    assert_eq!(balance, dec!(800));
    assert_eq!(h.mock.swap_count(), 2);
}

#[tokio::test]
async fn insufficient_balance_skips_without_an_attempt() {
    let h = harness().await;
    h.store
        .record_deposit(h.user.id, Chain::Mock, "USDT", dec!(50))
        .await
        .unwrap();

    let plan = h
        .scheduler
        .create_plan(
            h.user.id,
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        )
        .await
        .unwrap();

    let outcome = h.scheduler.tick_once(plan.id).await.unwrap();
    assert_eq!(outcome, TickOutcome::InsufficientBalance);

    // The skip is soft: no attempt row, no plan bookkeeping, no debit.
    let counts = h.store.attempt_counts().await.unwrap();
    assert_eq!(counts.pending + counts.completed + counts.failed, 0);

    let after = h.store.get_plan(plan.id).await.unwrap().unwrap();
    assert_eq!(after.execution_count, 0);
    assert_eq!(
        h.store
            .get_balance(h.user.id, Chain::Mock, "USDT")
            .await
            .unwrap(),
        dec!(50)
    );
    assert_eq!(h.mock.swap_count(), 0);
}

#[tokio::test]
async fn failed_swap_is_recovered_by_the_sweep() {
    let h = harness().await;
    h.store
        .record_deposit(h.user.id, Chain::Mock, "USDT", dec!(1000))
        .await
        .unwrap();

    let plan = h
        .scheduler
        .create_plan(
            h.user.id,
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        )
        .await
        .unwrap();

    h.mock.set_failing(true);
    let outcome = h.scheduler.tick_once(plan.id).await.unwrap();
    assert_eq!(outcome, TickOutcome::SwapFailed);

    // The failure leaves a Failed attempt but touches nothing else.
    let counts = h.store.attempt_counts().await.unwrap();
    assert_eq!(counts.failed, 1);
    let untouched = h.store.get_plan(plan.id).await.unwrap().unwrap();
    assert_eq!(untouched.execution_count, 0);
    assert_eq!(
        h.store
            .get_balance(h.user.id, Chain::Mock, "USDT")
            .await
            .unwrap(),
        dec!(1000)
    );

    // Chain comes back; the sweep completes the attempt and settles it.
    h.mock.set_failing(false);
    let summary = h.recovery.sweep().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.recovered, 1);

    let recovered = h.store.get_plan(plan.id).await.unwrap().unwrap();
    assert_eq!(recovered.execution_count, 1);
    assert_eq!(recovered.initial_amount, Some(dec!(100)));
    assert_eq!(recovered.total_invested, dec!(100));
    assert_eq!(
        h.store
            .get_balance(h.user.id, Chain::Mock, "USDT")
            .await
            .unwrap(),
        dec!(900)
    );

    let stats = h.recovery.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert!((stats.recovery_rate - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn stopped_plan_skips_its_next_tick() {
    let h = harness().await;
    h.store
        .record_deposit(h.user.id, Chain::Mock, "USDT", dec!(1000))
        .await
        .unwrap();

    let plan = h
        .scheduler
        .create_plan(
            h.user.id,
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        )
        .await
        .unwrap();

    h.scheduler.stop_plan(plan.id).await.unwrap();

    let outcome = h.scheduler.tick_once(plan.id).await.unwrap();
    assert_eq!(outcome, TickOutcome::SkippedInactive);
    assert_eq!(h.mock.swap_count(), 0);

    // Stopping again is a no-op.
    h.scheduler.stop_plan(plan.id).await.unwrap();
}

#[tokio::test]
async fn create_plan_rejects_unknown_chain_and_user() {
    let h = harness().await;

    // No plugin registered for Injective in this harness.
    let err = h
        .scheduler
        .create_plan(
            h.user.id,
            Chain::Injective,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, dcabot::Error::UnknownChain(Chain::Injective)));

    let err = h
        .scheduler
        .create_plan(
            Uuid::new_v4(),
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::No,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, dcabot::Error::UserNotFound(_)));

    assert!(h.store.list_active_plans().await.unwrap().is_empty());
}

#[tokio::test]
async fn ten_second_plan_fires_on_its_own_timer() {
    let h = harness().await;
    h.store
        .record_deposit(h.user.id, Chain::Mock, "USDT", dec!(1000))
        .await
        .unwrap();

    let plan = h
        .scheduler
        .create_plan(
            h.user.id,
            Chain::Mock,
            "INJ".to_string(),
            dec!(10),
            Frequency::TestTenSeconds,
            RiskLevel::No,
        )
        .await
        .unwrap();

    // Wait past one occurrence and let the spawned timer run the tick.
    tokio::time::sleep(std::time::Duration::from_secs(12)).await;

    let executed = h.store.get_plan(plan.id).await.unwrap().unwrap();
    assert!(executed.execution_count >= 1);

    h.scheduler.stop_plan(plan.id).await.unwrap();
    let attempts = h.store.attempt_counts().await.unwrap();
    assert!(attempts.completed >= 1);
    assert_eq!(attempts.failed, 0);
}
