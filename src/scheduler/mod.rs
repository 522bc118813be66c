//! Per-plan execution timers and the tick pipeline.
//!
//! Every active plan owns one tokio task that sleeps until the plan's next
//! occurrence, runs one tick, and goes back to sleep. Cancellation is
//! cooperative: stopping a plan fires a [`Notify`] that the loop observes
//! between ticks, so an in-flight tick always runs to completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rand::thread_rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::analyzer::{self, PriceSample};
use crate::api::PriceFeed;
use crate::cache::SampleCache;
use crate::db::Store;
use crate::error::Error;
use crate::models::{
    Analysis, AttemptKind, AttemptLeg, Chain, Frequency, InvestmentPlan, RiskLevel,
    TransactionAttempt,
};
use crate::plugins::PluginRegistry;
use crate::strategy;
use crate::Result;

/// Where a plan's timer currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Scheduled,
    Executing,
    Stopped,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Swap completed; carries the invested amount.
    Executed(Decimal),
    /// The plan was deactivated between scheduling and firing.
    SkippedInactive,
    /// Not enough quote balance; the tick is skipped, not failed.
    InsufficientBalance,
    /// The chain call failed; a Failed attempt was left for recovery.
    SwapFailed,
}

struct TimerHandle {
    cancel: Arc<Notify>,
}

/// How much cached history to keep: one analysis window plus a day of slack.
const CACHE_KEEP_HOURS: u64 = 31 * 24;

pub struct PlanScheduler {
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    feed: Arc<dyn PriceFeed>,
    cache: Option<Arc<dyn SampleCache>>,
    quote_symbol: String,
    timers: Mutex<HashMap<Uuid, TimerHandle>>,
    states: Mutex<HashMap<Uuid, PlanState>>,
}

impl PlanScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<PluginRegistry>,
        feed: Arc<dyn PriceFeed>,
        cache: Option<Arc<dyn SampleCache>>,
        quote_symbol: String,
    ) -> Self {
        Self {
            store,
            registry,
            feed,
            cache,
            quote_symbol,
            timers: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Validate, persist, and schedule a new plan.
    pub async fn create_plan(
        self: &Arc<Self>,
        user_id: Uuid,
        chain: Chain,
        token_symbol: String,
        amount: Decimal,
        frequency: Frequency,
        risk_level: RiskLevel,
    ) -> Result<InvestmentPlan> {
        // Reject unknown chains before anything is persisted.
        self.registry.get(chain)?;
        if self.store.get_user(user_id).await?.is_none() {
            return Err(Error::UserNotFound(user_id));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidField {
                field: "amount",
                value: amount.to_string(),
            });
        }

        let plan = InvestmentPlan::new(user_id, chain, token_symbol, amount, frequency, risk_level);
        self.store.create_plan(&plan).await?;
        self.schedule(&plan);

        tracing::info!(
            plan_id = %plan.id,
            chain = %chain,
            token = plan.token_symbol,
            frequency = %frequency,
            "Plan created and scheduled"
        );
        Ok(plan)
    }

    /// Spawn the timer task for a plan. Replaces any existing timer.
    pub fn schedule(self: &Arc<Self>, plan: &InvestmentPlan) {
        let cancel = Arc::new(Notify::new());
        let plan_id = plan.id;
        let frequency = plan.frequency;
        let scheduler = Arc::clone(self);
        let cancel_for_task = Arc::clone(&cancel);

        tokio::spawn(async move {
            loop {
                let wait = next_occurrence(frequency, Utc::now());
                tokio::select! {
                    _ = cancel_for_task.notified() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                scheduler.set_state(plan_id, PlanState::Executing);
                match scheduler.tick_once(plan_id).await {
                    Ok(TickOutcome::SkippedInactive) => {
                        scheduler.set_state(plan_id, PlanState::Stopped);
                        break;
                    }
                    Ok(outcome) => {
                        tracing::debug!(plan_id = %plan_id, ?outcome, "Tick finished");
                    }
                    Err(e) => {
                        // Tick errors never kill the timer.
                        tracing::error!(plan_id = %plan_id, "Tick failed: {e}");
                    }
                }
                scheduler.set_state(plan_id, PlanState::Scheduled);
            }
        });

        let mut timers = self.lock_timers();
        if let Some(old) = timers.insert(plan_id, TimerHandle { cancel }) {
            old.cancel.notify_one();
        }
        self.set_state(plan_id, PlanState::Scheduled);
    }

    /// Deactivate a plan and cancel its timer. Idempotent; stopping an
    /// unknown or already-stopped plan only touches persistence state.
    pub async fn stop_plan(&self, plan_id: Uuid) -> Result<()> {
        let mut plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or(Error::PlanNotFound(plan_id))?;

        if plan.is_active {
            plan.is_active = false;
            self.store.update_plan(&plan).await?;
        }

        if let Some(handle) = self.lock_timers().remove(&plan_id) {
            handle.cancel.notify_one();
        }
        self.set_state(plan_id, PlanState::Stopped);

        tracing::info!(plan_id = %plan_id, "Plan stopped");
        Ok(())
    }

    /// Stop every active plan. Returns how many were deactivated.
    pub async fn stop_all(&self) -> Result<u64> {
        let count = self.store.deactivate_all_plans().await?;

        let mut timers = self.lock_timers();
        for (plan_id, handle) in timers.drain() {
            handle.cancel.notify_one();
            self.set_state(plan_id, PlanState::Stopped);
        }

        tracing::info!("Stopped {} plans", count);
        Ok(count)
    }

    /// Re-arm timers for every active plan after a restart. Mock-chain plans
    /// are not resumed; orphaned plans (missing user or missing plugin) are
    /// force-deactivated rather than left to fail on every tick.
    pub async fn reload_active_plans(self: &Arc<Self>) -> Result<usize> {
        let plans = self.store.list_active_plans().await?;
        let mut scheduled = 0;

        for mut plan in plans {
            if plan.chain == Chain::Mock {
                tracing::debug!(plan_id = %plan.id, "Skipping mock-chain plan at reload");
                continue;
            }
            if !self.registry.contains(plan.chain) {
                tracing::warn!(
                    plan_id = %plan.id,
                    chain = %plan.chain,
                    "No plugin for plan's chain, deactivating"
                );
                plan.is_active = false;
                self.store.update_plan(&plan).await?;
                continue;
            }
            if self.store.get_user(plan.user_id).await?.is_none() {
                tracing::warn!(
                    plan_id = %plan.id,
                    user_id = %plan.user_id,
                    "Plan's user no longer exists, deactivating"
                );
                plan.is_active = false;
                self.store.update_plan(&plan).await?;
                continue;
            }

            self.schedule(&plan);
            scheduled += 1;
        }

        tracing::info!("Rescheduled {} active plans", scheduled);
        Ok(scheduled)
    }

    pub fn plan_state(&self, plan_id: Uuid) -> Option<PlanState> {
        self.lock_states().get(&plan_id).copied()
    }

    /// Run one execution of a plan: size the buy, check funds, record a
    /// pending attempt, fire the swap, and settle the books.
    pub async fn tick_once(&self, plan_id: Uuid) -> Result<TickOutcome> {
        let mut plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or(Error::PlanNotFound(plan_id))?;
        if !plan.is_active {
            return Ok(TickOutcome::SkippedInactive);
        }

        let user = self
            .store
            .get_user(plan.user_id)
            .await?
            .ok_or(Error::UserNotFound(plan.user_id))?;

        // First tick invests the nominal amount; later ticks are sized off
        // the first tick's snapshot and current momentum.
        let amount = if plan.execution_count == 0 {
            plan.amount
        } else {
            let analysis = self.market_analysis(&plan.token_symbol).await;
            let initial = plan.initial_amount.unwrap_or(plan.amount);
            strategy::execution_amount(initial, plan.risk_level, &analysis)
        };

        let available = self
            .store
            .get_balance(plan.user_id, plan.chain, &self.quote_symbol)
            .await?;
        if available < amount {
            tracing::info!(
                plan_id = %plan.id,
                %amount,
                %available,
                "Insufficient balance, skipping tick"
            );
            return Ok(TickOutcome::InsufficientBalance);
        }

        let price = self.feed.spot_price(&coin_id(&plan.token_symbol)).await?;
        if price <= 0.0 {
            return Err(Error::PriceFeed(format!(
                "non-positive spot price {price} for {}",
                plan.token_symbol
            )));
        }
        let price_dec = Decimal::from_f64(price).ok_or_else(|| Error::InvalidField {
            field: "price",
            value: price.to_string(),
        })?;

        let mut attempt = TransactionAttempt::new(
            &plan,
            AttemptKind::Buy,
            AttemptLeg {
                token: self.quote_symbol.clone(),
                amount,
            },
            AttemptLeg {
                token: plan.token_symbol.clone(),
                amount: amount / price_dec,
            },
            price,
            amount,
        );
        self.store.create_attempt(&attempt).await?;

        let plugin = self.registry.get(plan.chain)?;
        match plugin.send_swap(amount, &user.wallet_address).await {
            Ok(tx_hash) => {
                let now = Utc::now();
                attempt.mark_completed(tx_hash, now);
                self.store.update_attempt(&attempt).await?;

                plan.record_execution(amount, now);
                self.store.update_plan(&plan).await?;

                // The swap already happened, so a debit failure here (balance
                // drained since the sufficiency read) leaves the books
                // inconsistent. Record exactly what went undebited for
                // reconciliation instead of failing the tick.
                if let Err(e) = self
                    .store
                    .debit_balance(plan.user_id, plan.chain, &self.quote_symbol, amount)
                    .await
                {
                    tracing::error!(
                        attempt_id = %attempt.id,
                        plan_id = %plan.id,
                        undebited = %amount,
                        "Ledger debit failed after completed swap, manual reconciliation needed: {e}"
                    );
                }

                tracing::info!(
                    plan_id = %plan.id,
                    %amount,
                    execution = plan.execution_count,
                    "Tick executed"
                );
                Ok(TickOutcome::Executed(amount))
            }
            Err(e) => {
                attempt.mark_failed(e.to_string(), Utc::now());
                self.store.update_attempt(&attempt).await?;

                tracing::warn!(
                    plan_id = %plan.id,
                    attempt_id = %attempt.id,
                    "Swap failed, attempt left for recovery: {e}"
                );
                Ok(TickOutcome::SwapFailed)
            }
        }
    }

    /// Fetch 30 days of history and analyze it. Falls back to the cache when
    /// the feed is down, and to a neutral analysis when both are.
    async fn market_analysis(&self, token_symbol: &str) -> Analysis {
        let id = coin_id(token_symbol);

        let samples = match self.feed.fetch_history(&id, 30).await {
            Ok(samples) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.save_samples(token_symbol, &samples).await {
                        tracing::warn!("Failed to cache price samples: {e}");
                    }
                    // Every save also trims, so the set stays bounded.
                    if let Err(e) = cache.cleanup_old(token_symbol, CACHE_KEEP_HOURS).await {
                        tracing::warn!("Failed to trim cached price samples: {e}");
                    }
                }
                samples
            }
            Err(e) => {
                tracing::warn!("Price feed unavailable ({e}), trying cache");
                match self.cached_samples(token_symbol).await {
                    Some(samples) => samples,
                    None => return Analysis::neutral(),
                }
            }
        };

        match analyzer::analyze(&samples, &mut thread_rng()) {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!("Analysis failed ({e}), proceeding neutral");
                Analysis::neutral()
            }
        }
    }

    async fn cached_samples(&self, token_symbol: &str) -> Option<Vec<PriceSample>> {
        let cache = self.cache.as_ref()?;
        match cache.load_samples(token_symbol, 30 * 24).await {
            Ok(samples) if !samples.is_empty() => Some(samples),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Cache read failed: {e}");
                None
            }
        }
    }

    fn set_state(&self, plan_id: Uuid, state: PlanState) {
        self.lock_states().insert(plan_id, state);
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, TimerHandle>> {
        match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PlanState>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Provider coin id for a token symbol.
fn coin_id(symbol: &str) -> String {
    match symbol {
        "INJ" => "injective-protocol".to_string(),
        "APT" => "aptos".to_string(),
        "SONIC" => "sonic-svm".to_string(),
        other => other.to_lowercase(),
    }
}

/// Time until the next occurrence of `frequency`, measured from `now`.
///
/// Calendar frequencies snap to UTC boundaries: daily fires at the next
/// midnight, weekly on the next Sunday midnight, monthly on the first of the
/// next month.
pub fn next_occurrence(frequency: Frequency, now: DateTime<Utc>) -> std::time::Duration {
    let next = match frequency {
        Frequency::TestTenSeconds => now + Duration::seconds(10),
        Frequency::TestMinute => now + Duration::minutes(1),
        Frequency::Daily => midnight_after(now.date_naive()),
        Frequency::Weekly => {
            let days_to_sunday = 7 - now.weekday().num_days_from_sunday() as i64;
            midnight_after(now.date_naive() + Duration::days(days_to_sunday - 1))
        }
        Frequency::Monthly => {
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            match NaiveDate::from_ymd_opt(year, month, 1) {
                Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
                None => now + Duration::days(30),
            }
        }
    };

    (next - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
}

fn midnight_after(date: NaiveDate) -> DateTime<Utc> {
    (date + Duration::days(1)).and_time(NaiveTime::MIN).and_utc()
}
