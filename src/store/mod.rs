use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::AccountError;
use crate::models::{NewUser, Transaction, UsageRecord, User, UserPatch};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

// ============================================================================
// Account Store - Persistence Abstraction
// ============================================================================
//
// Repository for the User aggregate and its owned Transaction and
// UsageRecord rows. The store is the authority for uniqueness
// (external_id, referral_hash) and for atomicity: every balance and counter
// mutation below is an atomic increment at the storage layer, never a
// fetch-then-overwrite of a stale in-memory copy.
//
// ============================================================================

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create a user. Fails with `AlreadyExists` when `external_id` or
    /// `referral_hash` is already taken. The store assigns the id, the
    /// registration timestamp, and the initial trial expiry
    /// (`now + DEFAULT_SUBSCRIPTION_DAYS`).
    async fn create_user(&self, new: NewUser) -> Result<User, AccountError>;

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, AccountError>;

    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>, AccountError>;

    async fn user_by_referral_hash(&self, hash: &str) -> Result<Option<User>, AccountError>;

    /// Apply a whitelisted partial update and return the refreshed
    /// aggregate. Reassigning an already-set `invited_by_hash` is rejected
    /// with `ImmutableField`.
    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<User, AccountError>;

    /// Atomic `coins += delta`. Negative deltas may drive the balance below
    /// zero; no floor is enforced.
    async fn adjust_coins(&self, id: i64, delta: i64) -> Result<User, AccountError>;

    /// Atomic `referral_earnings += delta`, independent of `coins`.
    async fn adjust_referral_earnings(&self, id: i64, delta: i64) -> Result<User, AccountError>;

    /// Atomic `invited_count += 1`.
    async fn increment_invited_count(&self, id: i64) -> Result<User, AccountError>;

    /// Atomic `subscription_until += days`, cumulative from the stored
    /// expiry even when it is already in the past.
    async fn extend_subscription(&self, id: i64, days: i64) -> Result<User, AccountError>;

    /// Overwrite `subscription_until`, discarding any remaining time.
    async fn set_subscription(&self, id: i64, until: DateTime<Utc>) -> Result<User, AccountError>;

    /// Full set of users; ordering unspecified, callers paginate.
    async fn list_users(&self) -> Result<Vec<User>, AccountError>;

    /// Users whose `invited_by_hash` equals the given hash.
    async fn list_referrals(&self, inviter_hash: &str) -> Result<Vec<User>, AccountError>;

    async fn count_users(&self) -> Result<i64, AccountError>;

    /// Delete a user, cascading to transactions and usage records. Returns
    /// false when the user did not exist.
    async fn delete_user(&self, id: i64) -> Result<bool, AccountError>;

    async fn insert_transaction(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
    ) -> Result<Transaction, AccountError>;

    /// Ledger history, newest first.
    async fn transactions_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<Transaction>, AccountError>;

    /// Sum of all transaction amounts for the user; the audit view of the
    /// balance.
    async fn transaction_total(&self, user_id: i64) -> Result<i64, AccountError>;

    async fn insert_usage(&self, user_id: i64, coins_used: i64)
        -> Result<UsageRecord, AccountError>;

    /// Usage records with `used_at >= since`.
    async fn usage_for_user_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, AccountError>;

    /// Usage history, newest first.
    async fn usage_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, AccountError>;
}
