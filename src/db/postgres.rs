use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use super::Store;
use crate::error::Error;
use crate::models::{
    Allocation, AttemptCounts, AttemptLeg, BalanceEntry, Chain, InvestmentPlan,
    TransactionAttempt, User,
};
use crate::Result;

/// Postgres-backed persistence.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run pending migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    fn plan_from_row(row: &sqlx::postgres::PgRow) -> Result<InvestmentPlan> {
        let chain_str: String = row.get("chain");
        let frequency_str: String = row.get("frequency");
        let risk_str: String = row.get("risk_level");
        let execution_count: i32 = row.get("execution_count");

        Ok(InvestmentPlan {
            id: row.get("id"),
            user_id: row.get("user_id"),
            chain: chain_str.parse()?,
            token_symbol: row.get("token_symbol"),
            frequency: frequency_str.parse()?,
            amount: row.get("amount"),
            initial_amount: row.get("initial_amount"),
            total_invested: row.get("total_invested"),
            execution_count: execution_count as u32,
            risk_level: risk_str.parse()?,
            is_active: row.get("is_active"),
            last_execution_time: row.get("last_execution_time"),
            created_at: row.get("created_at"),
        })
    }

    fn attempt_from_row(row: &sqlx::postgres::PgRow) -> Result<TransactionAttempt> {
        let chain_str: String = row.get("chain");
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");
        let retry_count: i32 = row.get("retry_count");
        let max_retries: i32 = row.get("max_retries");

        Ok(TransactionAttempt {
            id: row.get("id"),
            plan_id: row.get("plan_id"),
            user_id: row.get("user_id"),
            chain: chain_str.parse()?,
            kind: kind_str.parse()?,
            from: AttemptLeg {
                token: row.get("from_token"),
                amount: row.get("from_amount"),
            },
            to: AttemptLeg {
                token: row.get("to_token"),
                amount: row.get("to_amount"),
            },
            price: row.get("price"),
            value: row.get("value"),
            invested: row.get("invested"),
            status: status_str.parse()?,
            retry_count: retry_count as u32,
            max_retries: max_retries as u32,
            last_attempt_time: row.get("last_attempt_time"),
            error: row.get("error"),
            tx_hash: row.get("tx_hash"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, wallet_address, total_deposited, total_withdrawn, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.wallet_address)
        .bind(user.total_deposited)
        .bind(user.total_withdrawn)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, wallet_address, total_deposited, total_withdrawn, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            wallet_address: row.get("wallet_address"),
            total_deposited: row.get("total_deposited"),
            total_withdrawn: row.get("total_withdrawn"),
            created_at: row.get("created_at"),
        }))
    }

    async fn create_plan(&self, plan: &InvestmentPlan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plans (
                id, user_id, chain, token_symbol, frequency, amount,
                initial_amount, total_invested, execution_count, risk_level,
                is_active, last_execution_time, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(plan.id)
        .bind(plan.user_id)
        .bind(plan.chain.as_str())
        .bind(&plan.token_symbol)
        .bind(plan.frequency.as_str())
        .bind(plan.amount)
        .bind(plan.initial_amount)
        .bind(plan.total_invested)
        .bind(plan.execution_count as i32)
        .bind(plan.risk_level.as_str())
        .bind(plan.is_active)
        .bind(plan.last_execution_time)
        .bind(plan.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(plan_id = %plan.id, "Saved plan to Postgres");
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<InvestmentPlan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::plan_from_row(&row)).transpose()
    }

    async fn update_plan(&self, plan: &InvestmentPlan) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE plans SET
                initial_amount = $2,
                total_invested = $3,
                execution_count = $4,
                is_active = $5,
                last_execution_time = $6
            WHERE id = $1
            "#,
        )
        .bind(plan.id)
        .bind(plan.initial_amount)
        .bind(plan.total_invested)
        .bind(plan.execution_count as i32)
        .bind(plan.is_active)
        .bind(plan.last_execution_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active_plans(&self) -> Result<Vec<InvestmentPlan>> {
        let rows = sqlx::query("SELECT * FROM plans WHERE is_active = TRUE ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::plan_from_row).collect()
    }

    async fn deactivate_all_plans(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE plans SET is_active = FALSE WHERE is_active = TRUE")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn create_attempt(&self, attempt: &TransactionAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attempts (
                id, plan_id, user_id, chain, kind,
                from_token, from_amount, to_token, to_amount,
                price, value, invested, status, retry_count, max_retries,
                last_attempt_time, error, tx_hash, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.plan_id)
        .bind(attempt.user_id)
        .bind(attempt.chain.as_str())
        .bind(attempt.kind.as_str())
        .bind(&attempt.from.token)
        .bind(attempt.from.amount)
        .bind(&attempt.to.token)
        .bind(attempt.to.amount)
        .bind(attempt.price)
        .bind(attempt.value)
        .bind(attempt.invested)
        .bind(attempt.status.as_str())
        .bind(attempt.retry_count as i32)
        .bind(attempt.max_retries as i32)
        .bind(attempt.last_attempt_time)
        .bind(&attempt.error)
        .bind(&attempt.tx_hash)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<TransactionAttempt>> {
        let row = sqlx::query("SELECT * FROM attempts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::attempt_from_row(&row)).transpose()
    }

    async fn update_attempt(&self, attempt: &TransactionAttempt) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE attempts SET
                status = $2,
                retry_count = $3,
                last_attempt_time = $4,
                error = $5,
                tx_hash = $6
            WHERE id = $1
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.status.as_str())
        .bind(attempt.retry_count as i32)
        .bind(attempt.last_attempt_time)
        .bind(&attempt.error)
        .bind(&attempt.tx_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recovery_candidates(
        &self,
        stuck_before: DateTime<Utc>,
    ) -> Result<Vec<TransactionAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM attempts
            WHERE (status = 'failed' AND retry_count < max_retries)
               OR (status = 'pending' AND last_attempt_time < $1)
            ORDER BY last_attempt_time ASC
            "#,
        )
        .bind(stuck_before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::attempt_from_row).collect()
    }

    async fn attempt_counts(&self) -> Result<AttemptCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed' AND retry_count = 0) AS failed,
                COUNT(*) FILTER (WHERE status = 'failed' AND retry_count > 0) AS retrying
            FROM attempts
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let pending: i64 = row.get("pending");
        let completed: i64 = row.get("completed");
        let failed: i64 = row.get("failed");
        let retrying: i64 = row.get("retrying");

        Ok(AttemptCounts {
            pending: pending as u64,
            completed: completed as u64,
            failed: failed as u64,
            retrying: retrying as u64,
        })
    }

    async fn get_balance(&self, user_id: Uuid, chain: Chain, token: &str) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT balance FROM balances
            WHERE user_id = $1 AND chain = $2 AND token_symbol = $3
            "#,
        )
        .bind(user_id)
        .bind(chain.as_str())
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("balance")).unwrap_or(Decimal::ZERO))
    }

    async fn credit_balance(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        // Single-statement upsert; concurrent credits never lose an increment.
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, chain, token_symbol, balance, last_updated)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, chain, token_symbol) DO UPDATE SET
                balance = balances.balance + EXCLUDED.balance,
                last_updated = NOW()
            "#,
        )
        .bind(user_id)
        .bind(chain.as_str())
        .bind(token)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn debit_balance(
        &self,
        user_id: Uuid,
        chain: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<()> {
        // The sufficiency guard lives in the statement itself, so two
        // concurrent debits cannot drive the balance negative.
        let result = sqlx::query(
            r#"
            UPDATE balances SET
                balance = balance - $4,
                last_updated = NOW()
            WHERE user_id = $1 AND chain = $2 AND token_symbol = $3
              AND balance >= $4
            "#,
        )
        .bind(user_id)
        .bind(chain.as_str())
        .bind(token)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let available = self.get_balance(user_id, chain, token).await?;
            return Err(Error::InsufficientBalance {
                required: amount,
                available,
            });
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

        sqlx::query("UPDATE users SET total_deposited = total_deposited + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;

        tracing::info!(%user_id, chain = %chain, token, %amount, "Deposit recorded");
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

        sqlx::query("UPDATE users SET total_withdrawn = total_withdrawn + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;

        tracing::info!(%user_id, chain = %chain, token, %amount, "Withdrawal recorded");
        Ok(())
    }

    async fn list_balances(&self, user_id: Uuid) -> Result<Vec<BalanceEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT chain, token_symbol, balance, last_updated
            FROM balances
            WHERE user_id = $1
            ORDER BY chain, token_symbol
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let chain_str: String = row.get("chain");
                Ok(BalanceEntry {
                    chain: chain_str.parse()?,
                    token_symbol: row.get("token_symbol"),
                    balance: row.get("balance"),
                    last_updated: row.get("last_updated"),
                })
            })
            .collect()
    }

    async fn add_allocation(&self, user_id: Uuid, allocation: &Allocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO allocations (id, user_id, chain, strategy_id, amount, status, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(allocation.id)
        .bind(user_id)
        .bind(allocation.chain.as_str())
        .bind(allocation.strategy_id)
        .bind(allocation.amount)
        .bind(allocation.status.as_str())
        .bind(allocation.start_date)
        .bind(allocation.end_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_allocations(&self, user_id: Uuid) -> Result<Vec<Allocation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chain, strategy_id, amount, status, start_date, end_date
            FROM allocations
            WHERE user_id = $1
            ORDER BY start_date
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let chain_str: String = row.get("chain");
                let status_str: String = row.get("status");
                Ok(Allocation {
                    id: row.get("id"),
                    chain: chain_str.parse()?,
                    strategy_id: row.get("strategy_id"),
                    amount: row.get("amount"),
                    status: status_str.parse()?,
                    start_date: row.get("start_date"),
                    end_date: row.get("end_date"),
                })
            })
            .collect()
    }
}
