use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use uuid::Uuid;

use dcabot::api::HttpPriceFeed;
use dcabot::cache::{PriceCache, SampleCache};
use dcabot::config::Settings;
use dcabot::db::{PostgresStore, Store};
use dcabot::ledger::BalanceLedger;
use dcabot::models::{Allocation, AllocationStatus, Chain, Frequency, RiskLevel, User};
use dcabot::plugins::PluginRegistry;
use dcabot::recovery::RecoveryEngine;
use dcabot::scheduler::PlanScheduler;

#[derive(Parser)]
#[command(name = "dcabot", about = "Recurring-investment engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine: reload plans, start timers and the recovery sweep
    Run,
    /// Register a user wallet
    CreateUser {
        wallet_address: String,
    },
    /// Create and schedule a new investment plan
    CreatePlan {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        chain: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "daily")]
        frequency: String,
        #[arg(long, default_value = "no")]
        risk: String,
    },
    /// Deactivate one plan
    StopPlan {
        id: Uuid,
    },
    /// Deactivate every active plan
    StopAll,
    /// Credit a user's internal balance
    Deposit {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        chain: String,
        #[arg(long, default_value = "USDT")]
        token: String,
        #[arg(long)]
        amount: Decimal,
    },
    /// Send funds to the user's wallet and debit the internal balance
    Withdraw {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        chain: String,
        #[arg(long, default_value = "USDT")]
        token: String,
        #[arg(long)]
        amount: Decimal,
    },
    /// Earmark part of a user's balance for a strategy
    Allocate {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        chain: String,
        #[arg(long, default_value = "USDT")]
        token: String,
        #[arg(long)]
        strategy: Uuid,
        #[arg(long)]
        amount: Decimal,
    },
    /// Print attempt tallies and the recovery rate
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::CreateUser { wallet_address } => {
            let store = PostgresStore::new(&settings.database_url).await?;
            let user = User::new(wallet_address);
            store.create_user(&user).await?;
            println!("created user {}", user.id);
            Ok(())
        }
        Command::CreatePlan {
            user,
            chain,
            token,
            amount,
            frequency,
            risk,
        } => {
            let store: Arc<dyn Store> = Arc::new(PostgresStore::new(&settings.database_url).await?);
            let registry = Arc::new(PluginRegistry::new());
            registry.initialize(&settings.chains);
            let feed = Arc::new(HttpPriceFeed::new(
                settings.price_api_base.clone(),
                settings.price_api_key.clone(),
            )?);

            let scheduler = Arc::new(PlanScheduler::new(
                store,
                registry,
                feed,
                None,
                settings.quote_symbol.clone(),
            ));
            let plan = scheduler
                .create_plan(
                    user,
                    Chain::from_str(&chain)?,
                    token,
                    amount,
                    Frequency::from_str(&frequency)?,
                    RiskLevel::from_str(&risk)?,
                )
                .await?;
            println!("created plan {}", plan.id);
            Ok(())
        }
        Command::StopPlan { id } => {
            let store = PostgresStore::new(&settings.database_url).await?;
            let mut plan = store
                .get_plan(id)
                .await?
                .ok_or(dcabot::Error::PlanNotFound(id))?;
            plan.is_active = false;
            store.update_plan(&plan).await?;
            println!("stopped plan {id}");
            Ok(())
        }
        Command::StopAll => {
            let store = PostgresStore::new(&settings.database_url).await?;
            let count = store.deactivate_all_plans().await?;
            println!("stopped {count} plans");
            Ok(())
        }
        Command::Deposit {
            user,
            chain,
            token,
            amount,
        } => {
            let store: Arc<dyn Store> = Arc::new(PostgresStore::new(&settings.database_url).await?);
            let ledger = BalanceLedger::new(store);
            ledger
                .deposit(user, Chain::from_str(&chain)?, &token, amount)
                .await?;
            println!("deposited {amount} {token}");
            Ok(())
        }
        Command::Withdraw {
            user,
            chain,
            token,
            amount,
        } => {
            let store: Arc<dyn Store> = Arc::new(PostgresStore::new(&settings.database_url).await?);
            let registry = Arc::new(PluginRegistry::new());
            registry.initialize(&settings.chains);

            let chain = Chain::from_str(&chain)?;
            let user_rec = store
                .get_user(user)
                .await?
                .ok_or(dcabot::Error::UserNotFound(user))?;
            let ledger = BalanceLedger::new(store);

            let available = ledger.available(user, chain, &token).await?;
            if available < amount {
                return Err(dcabot::Error::InsufficientBalance {
                    required: amount,
                    available,
                }
                .into());
            }

            // On-chain transfer first; the books are only debited once the
            // chain accepted the transaction.
            let plugin = registry.get(chain)?;
            let tx_hash = plugin.withdraw(amount, &user_rec.wallet_address).await?;
            ledger.withdraw(user, chain, &token, amount).await?;
            println!("withdrew {amount} {token} ({tx_hash})");
            Ok(())
        }
        Command::Allocate {
            user,
            chain,
            token,
            strategy,
            amount,
        } => {
            let store: Arc<dyn Store> = Arc::new(PostgresStore::new(&settings.database_url).await?);
            let ledger = BalanceLedger::new(store);
            let allocation = Allocation {
                id: Uuid::new_v4(),
                chain: Chain::from_str(&chain)?,
                strategy_id: strategy,
                amount,
                status: AllocationStatus::Active,
                start_date: chrono::Utc::now(),
                end_date: None,
            };
            ledger.allocate(user, &token, allocation).await?;
            println!("allocated {amount} {token} to strategy {strategy}");
            Ok(())
        }
        Command::Stats => {
            let store: Arc<dyn Store> = Arc::new(PostgresStore::new(&settings.database_url).await?);
            let registry = Arc::new(PluginRegistry::new());
            let engine = RecoveryEngine::new(store, registry, settings.quote_symbol.clone());
            let stats = engine.stats().await?;
            println!("pending:   {}", stats.pending);
            println!("completed: {}", stats.completed);
            println!("failed:    {}", stats.failed);
            println!("retrying:  {}", stats.retrying);
            println!("recovery rate: {:.1}%", stats.recovery_rate * 100.0);
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    tracing::info!("🚀 dcabot starting");

    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(&settings.database_url).await?);

    let registry = Arc::new(PluginRegistry::new());
    registry.initialize(&settings.chains);

    let feed = Arc::new(HttpPriceFeed::new(
        settings.price_api_base.clone(),
        settings.price_api_key.clone(),
    )?);

    // The price cache is best-effort; the engine runs without it.
    let cache: Option<Arc<dyn SampleCache>> = match &settings.redis_url {
        Some(url) => match PriceCache::new(url).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                tracing::warn!("Price cache disabled: {e}");
                None
            }
        },
        None => None,
    };

    let scheduler = Arc::new(PlanScheduler::new(
        store.clone(),
        registry.clone(),
        feed,
        cache,
        settings.quote_symbol.clone(),
    ));
    let reloaded = scheduler.reload_active_plans().await?;
    tracing::info!("✅ {} plans scheduled", reloaded);

    let recovery = Arc::new(
        RecoveryEngine::new(store, registry, settings.quote_symbol.clone()).with_intervals(
            std::time::Duration::from_secs(settings.sweep_interval_secs),
            settings.pending_timeout_mins,
        ),
    );
    let sweep_task = recovery.spawn();

    tracing::info!("Press Ctrl+C to stop...");

    // Plans stay active in the database across restarts; shutdown only
    // drops the in-process timers.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = sweep_task => {
            tracing::error!("Recovery sweep loop exited: {:?}", result);
        }
    }

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dcabot=info".into()),
        )
        .init();
}
