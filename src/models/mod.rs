use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Supported chains. Mock is used for simulated trading and tests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Injective,
    Aptos,
    Sonic,
    Mock,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Injective => "injective",
            Chain::Aptos => "aptos",
            Chain::Sonic => "sonic",
            Chain::Mock => "mock",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "injective" => Ok(Chain::Injective),
            "aptos" => Ok(Chain::Aptos),
            "sonic" => Ok(Chain::Sonic),
            "mock" => Ok(Chain::Mock),
            other => Err(Error::InvalidField {
                field: "chain",
                value: other.to_string(),
            }),
        }
    }
}

/// How often a plan executes. The test variants exist for live smoke-testing
/// without waiting a day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    TestMinute,
    TestTenSeconds,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::TestMinute => "test-minute",
            Frequency::TestTenSeconds => "test-10s",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "test-minute" => Ok(Frequency::TestMinute),
            "test-10s" => Ok(Frequency::TestTenSeconds),
            other => Err(Error::InvalidField {
                field: "frequency",
                value: other.to_string(),
            }),
        }
    }
}

/// User-chosen risk tier. Maps to a multiplier that amplifies the nominal
/// per-tick amount before the price factor biases it against trend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    No,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn multiplier(&self) -> Decimal {
        match self {
            RiskLevel::No => Decimal::new(10, 1),     // 1.0
            RiskLevel::Low => Decimal::new(12, 1),    // 1.2
            RiskLevel::Medium => Decimal::new(15, 1), // 1.5
            RiskLevel::High => Decimal::new(20, 1),   // 2.0
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::No => "no",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "no" => Ok(RiskLevel::No),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(Error::InvalidField {
                field: "risk_level",
                value: other.to_string(),
            }),
        }
    }
}

/// A user's recurring DCA configuration for one chain/token.
///
/// Plans are never physically deleted; stopping a plan flips `is_active` and
/// that is terminal for this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentPlan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub chain: Chain,
    pub token_symbol: String,
    pub frequency: Frequency,
    /// Nominal per-tick investment, in the quote currency.
    pub amount: Decimal,
    /// Snapshot of the amount actually invested at the first successful
    /// execution. Written exactly once, on the 0 -> 1 execution_count
    /// transition.
    pub initial_amount: Option<Decimal>,
    pub total_invested: Decimal,
    pub execution_count: u32,
    pub risk_level: RiskLevel,
    pub is_active: bool,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InvestmentPlan {
    pub fn new(
        user_id: Uuid,
        chain: Chain,
        token_symbol: String,
        amount: Decimal,
        frequency: Frequency,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            chain,
            token_symbol,
            frequency,
            amount,
            initial_amount: None,
            total_invested: Decimal::ZERO,
            execution_count: 0,
            risk_level,
            is_active: true,
            last_execution_time: None,
            created_at: Utc::now(),
        }
    }

    /// Apply the bookkeeping for one successful execution. `initial_amount`
    /// is only ever written on the first execution.
    pub fn record_execution(&mut self, invested: Decimal, now: DateTime<Utc>) {
        self.total_invested += invested;
        self.execution_count += 1;
        if self.execution_count == 1 {
            self.initial_amount = Some(invested);
        }
        self.last_execution_time = Some(now);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptKind {
    Buy,
    Sell,
    Swap,
}

impl AttemptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptKind::Buy => "buy",
            AttemptKind::Sell => "sell",
            AttemptKind::Swap => "swap",
        }
    }
}

impl FromStr for AttemptKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "buy" => Ok(AttemptKind::Buy),
            "sell" => Ok(AttemptKind::Sell),
            "swap" => Ok(AttemptKind::Swap),
            other => Err(Error::InvalidField {
                field: "kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Completed,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Failed => "failed",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "completed" => Ok(AttemptStatus::Completed),
            "failed" => Ok(AttemptStatus::Failed),
            other => Err(Error::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// One side of a swap: a token and how much of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptLeg {
    pub token: String,
    pub amount: Decimal,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One recorded try (initial or retried) of executing a plan's swap.
///
/// Status moves Pending -> Completed | Failed; a Failed attempt may be
/// retried, mutating the same record. Completed never regresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionAttempt {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub user_id: Uuid,
    pub chain: Chain,
    pub kind: AttemptKind,
    pub from: AttemptLeg,
    pub to: AttemptLeg,
    /// Spot price of the target token at attempt creation.
    pub price: f64,
    /// USD value of the attempt.
    pub value: Decimal,
    /// Quote currency spent.
    pub invested: Decimal,
    pub status: AttemptStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_attempt_time: DateTime<Utc>,
    pub error: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionAttempt {
    pub fn new(
        plan: &InvestmentPlan,
        kind: AttemptKind,
        from: AttemptLeg,
        to: AttemptLeg,
        price: f64,
        invested: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            user_id: plan.user_id,
            chain: plan.chain,
            kind,
            from,
            to,
            price,
            value: invested,
            invested,
            status: AttemptStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_attempt_time: now,
            error: None,
            tx_hash: None,
            created_at: now,
        }
    }

    pub fn mark_completed(&mut self, tx_hash: String, now: DateTime<Utc>) {
        self.status = AttemptStatus::Completed;
        self.tx_hash = Some(tx_hash);
        self.error = None;
        self.last_attempt_time = now;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = AttemptStatus::Failed;
        self.error = Some(error);
        self.last_attempt_time = now;
    }
}

/// A registered user. Deposit/withdrawal totals only ever grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub wallet_address: String,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(wallet_address: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }
}

/// One per-user, per-chain, per-token balance row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub chain: Chain,
    pub token_symbol: String,
    pub balance: Decimal,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Active,
    Closed,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Active => "active",
            AllocationStatus::Closed => "closed",
        }
    }
}

impl FromStr for AllocationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "active" => Ok(AllocationStatus::Active),
            "closed" => Ok(AllocationStatus::Closed),
            other => Err(Error::InvalidField {
                field: "allocation_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Funds earmarked for a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub chain: Chain,
    pub strategy_id: Uuid,
    pub amount: Decimal,
    pub status: AllocationStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Transient output of the price analyzer. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub moving_average_7d: f64,
    pub moving_average_30d: f64,
    pub price_change_percentage: f64,
    /// Heuristic momentum scalar in [0, 2].
    pub price_factor: f64,
    pub is_price_going_up: bool,
}

impl Analysis {
    /// Fail-open default used when price data is unavailable: a factor of 1.0
    /// leaves the sizing formula's random component untouched.
    pub fn neutral() -> Self {
        Self {
            moving_average_7d: 0.0,
            moving_average_30d: 0.0,
            price_change_percentage: 0.0,
            price_factor: 1.0,
            is_price_going_up: false,
        }
    }
}

/// Attempt tallies by state, as reported by the recovery engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounts {
    pub pending: u64,
    pub completed: u64,
    /// Failed and never retried.
    pub failed: u64,
    /// Failed with at least one retry behind it.
    pub retrying: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_risk_multipliers() {
        assert_eq!(RiskLevel::No.multiplier(), dec!(1.0));
        assert_eq!(RiskLevel::Low.multiplier(), dec!(1.2));
        assert_eq!(RiskLevel::Medium.multiplier(), dec!(1.5));
        assert_eq!(RiskLevel::High.multiplier(), dec!(2.0));
    }

    #[test]
    fn test_frequency_round_trip() {
        for freq in [
            Frequency::Daily,
            Frequency::Weekly,
            Frequency::Monthly,
            Frequency::TestMinute,
            Frequency::TestTenSeconds,
        ] {
            assert_eq!(freq.as_str().parse::<Frequency>().unwrap(), freq);
        }
        assert!("hourly".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_initial_amount_set_once() {
        let mut plan = InvestmentPlan::new(
            Uuid::new_v4(),
            Chain::Mock,
            "INJ".to_string(),
            dec!(100),
            Frequency::Daily,
            RiskLevel::Medium,
        );
        assert_eq!(plan.initial_amount, None);

        plan.record_execution(dec!(100), Utc::now());
        assert_eq!(plan.execution_count, 1);
        assert_eq!(plan.initial_amount, Some(dec!(100)));

        // A later, larger execution must not touch the snapshot.
        plan.record_execution(dec!(150), Utc::now());
        assert_eq!(plan.execution_count, 2);
        assert_eq!(plan.initial_amount, Some(dec!(100)));
        assert_eq!(plan.total_invested, dec!(250));
    }

    #[test]
    fn test_total_invested_accumulates() {
        let mut plan = InvestmentPlan::new(
            Uuid::new_v4(),
            Chain::Injective,
            "INJ".to_string(),
            dec!(50),
            Frequency::Weekly,
            RiskLevel::No,
        );

        let before = plan.total_invested;
        plan.record_execution(dec!(50), Utc::now());
        assert_eq!(plan.total_invested, before + dec!(50));
    }

    #[test]
    fn test_attempt_status_transitions() {
        let plan = InvestmentPlan::new(
            Uuid::new_v4(),
            Chain::Aptos,
            "APT".to_string(),
            dec!(25),
            Frequency::Daily,
            RiskLevel::Low,
        );
        let mut attempt = TransactionAttempt::new(
            &plan,
            AttemptKind::Buy,
            AttemptLeg {
                token: "USDT".to_string(),
                amount: dec!(25),
            },
            AttemptLeg {
                token: "APT".to_string(),
                amount: dec!(5),
            },
            5.0,
            dec!(25),
        );
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert_eq!(attempt.max_retries, DEFAULT_MAX_RETRIES);

        attempt.mark_failed("rpc timeout".to_string(), Utc::now());
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.error.as_deref(), Some("rpc timeout"));

        attempt.mark_completed("0xabc".to_string(), Utc::now());
        assert_eq!(attempt.status, AttemptStatus::Completed);
        assert_eq!(attempt.tx_hash.as_deref(), Some("0xabc"));
        assert!(attempt.error.is_none());
    }

    #[test]
    fn test_neutral_analysis() {
        let neutral = Analysis::neutral();
        assert_eq!(neutral.price_factor, 1.0);
        assert!(!neutral.is_price_going_up);
        assert_eq!(neutral.price_change_percentage, 0.0);
    }
}
