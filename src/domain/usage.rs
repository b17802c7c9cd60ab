use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::domain::errors::AccountError;
use crate::models::{UsageRecord, UsageStats};
use crate::store::AccountStore;

// ============================================================================
// Usage Tracker - Consumption Events & Rolling Statistics
// ============================================================================
//
// Records what was consumed, not what it cost: recording usage never debits
// coins. Callers that charge for usage pair this with the ledger.
//
// ============================================================================

pub struct UsageTracker {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn record_usage(
        &self,
        user_id: i64,
        coins_used: i64,
    ) -> Result<UsageRecord, AccountError> {
        if coins_used < 0 {
            return Err(AccountError::NegativeUsage(coins_used));
        }
        let record = self.store.insert_usage(user_id, coins_used).await?;
        tracing::debug!(user_id, coins_used, "Usage recorded");
        Ok(record)
    }

    /// Rolling statistics over records with `used_at >= now - window_days`.
    pub async fn usage_stats(
        &self,
        user_id: i64,
        window_days: i64,
    ) -> Result<UsageStats, AccountError> {
        let since = self.clock.now() - Duration::days(window_days);
        let records = self.store.usage_for_user_since(user_id, since).await?;

        let total_usages = records.len() as i64;
        let total_coins_used: i64 = records.iter().map(|r| r.coins_used).sum();
        let average_per_usage = if total_usages == 0 {
            0.0
        } else {
            total_coins_used as f64 / total_usages as f64
        };

        Ok(UsageStats {
            period_days: window_days,
            total_usages,
            total_coins_used,
            average_per_usage,
        })
    }

    /// Usage history, newest first.
    pub async fn recent_usage(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, AccountError> {
        self.store.usage_for_user(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::clock::ManualClock;
    use crate::models::NewUser;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<ManualClock>, UsageTracker, i64) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let user = store
            .create_user(NewUser::new(1, "hash00000001"))
            .await
            .unwrap();
        let tracker = UsageTracker::new(store, clock.clone());
        (clock, tracker, user.id)
    }

    #[tokio::test]
    async fn empty_window_yields_zero_average() {
        let (_, tracker, user_id) = setup().await;
        let stats = tracker.usage_stats(user_id, 7).await.unwrap();
        assert_eq!(
            stats,
            UsageStats {
                period_days: 7,
                total_usages: 0,
                total_coins_used: 0,
                average_per_usage: 0.0,
            }
        );
    }

    #[tokio::test]
    async fn stats_cover_only_the_window() {
        let (clock, tracker, user_id) = setup().await;

        tracker.record_usage(user_id, 10).await.unwrap();
        clock.advance(Duration::days(10));
        tracker.record_usage(user_id, 2).await.unwrap();
        tracker.record_usage(user_id, 4).await.unwrap();

        let stats = tracker.usage_stats(user_id, 7).await.unwrap();
        assert_eq!(stats.total_usages, 2);
        assert_eq!(stats.total_coins_used, 6);
        assert_eq!(stats.average_per_usage, 3.0);
    }

    #[tokio::test]
    async fn negative_usage_is_rejected_before_any_write() {
        let (_, tracker, user_id) = setup().await;
        let err = tracker.record_usage(user_id, -1).await.unwrap_err();
        assert!(matches!(err, AccountError::NegativeUsage(-1)));
        assert!(tracker.recent_usage(user_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recording_usage_never_debits_coins() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let user = store
            .create_user(NewUser::new(1, "hash00000001"))
            .await
            .unwrap();
        let tracker = UsageTracker::new(store.clone(), clock);

        tracker.record_usage(user.id, 5).await.unwrap();
        let after = store.user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(after.coins, user.coins);
    }
}
