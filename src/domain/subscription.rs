use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::domain::errors::AccountError;
use crate::models::User;
use crate::store::AccountStore;

// ============================================================================
// Subscription Manager - Expiry Arithmetic
// ============================================================================
//
// Moves the single forward-only expiry timestamp. Nothing here gates
// access: "is the subscription active" is a plain comparison performed by
// the calling context at read time. No timers, no schedulers.
//
// ============================================================================

pub struct SubscriptionManager {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Cumulative extension from the stored expiry, even when it is already
    /// in the past. A lapsed subscription extended by a small number of days
    /// may therefore still be expired.
    pub async fn extend_subscription(
        &self,
        user_id: i64,
        days: i64,
    ) -> Result<User, AccountError> {
        let user = self.store.extend_subscription(user_id, days).await?;
        tracing::debug!(
            user_id,
            days,
            until = %user.subscription_until,
            "Subscription extended"
        );
        Ok(user)
    }

    /// Administrative override: `now + days`, discarding any remaining time.
    pub async fn reset_subscription(&self, user_id: i64, days: i64) -> Result<User, AccountError> {
        let until = self.clock.now() + Duration::days(days);
        let user = self.store.set_subscription(user_id, until).await?;
        tracing::info!(user_id, days, until = %user.subscription_until, "Subscription reset");
        Ok(user)
    }

    /// Read-time helper; the manager itself never enforces this.
    pub fn is_active(&self, user: &User) -> bool {
        user.subscription_until > self.clock.now()
    }
}
