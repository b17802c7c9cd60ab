use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use referral_ledger::{
    AccountService, AccountStore, Config, MemoryStore, PostgresStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,referral_ledger=debug")),
        )
        .init();

    tracing::info!("🚀 Starting referral ledger account service");

    let config = Config::from_env();

    // === 1. Pick the store ===
    let store: Arc<dyn AccountStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to Postgres...");
            Arc::new(PostgresStore::connect(url).await?)
        }
        None => {
            tracing::info!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let accounts = AccountService::new(store);

    // === 2. Demonstrate the account lifecycle ===
    tracing::info!("📝 Demonstrating registration, referral, payment, and usage");

    let inviter = accounts
        .register_or_fetch(111_222_333, Some("inviter"), None)
        .await?;
    tracing::info!(
        external_id = inviter.external_id,
        referral_hash = %inviter.referral_hash,
        coins = inviter.coins,
        "✅ Inviter registered"
    );

    let invited = accounts
        .register_or_fetch(444_555_666, Some("invited"), Some(&inviter.referral_hash))
        .await?;
    tracing::info!(
        external_id = invited.external_id,
        invited_by = ?invited.invited_by_hash,
        "✅ Invited user registered via referral link"
    );
    tracing::debug!(profile = %serde_json::to_string(&invited)?, "Profile snapshot");

    // The invited user pays: coins + subscription days, referrer gets a cut.
    let outcome = accounts
        .process_payment(invited.external_id, 50, 30, 1000.0)
        .await?;
    tracing::info!(
        coins_added = outcome.coins_added,
        days_added = outcome.days_added,
        referrer_bonus = outcome.referrer_bonus,
        "✅ Payment processed"
    );

    // Some consumption, then the rolling view of it.
    accounts.record_usage(invited.external_id, 3).await?;
    accounts.record_usage(invited.external_id, 5).await?;
    if let Some(stats) = accounts.usage_stats(invited.external_id, 7).await? {
        tracing::info!(
            total_usages = stats.total_usages,
            total_coins_used = stats.total_coins_used,
            average = stats.average_per_usage,
            "📊 Usage over the last week"
        );
    }

    let stats = accounts.account_stats().await?;
    tracing::info!(
        users = stats.users_count,
        total_coins = stats.total_coins,
        average_coins = stats.average_coins,
        "📊 Store-wide account stats"
    );

    tracing::info!("🎉 Demo complete!");

    Ok(())
}
