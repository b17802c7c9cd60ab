use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::domain::errors::AccountError;
use crate::models::{
    NewUser, Transaction, UsageRecord, User, UserPatch, DEFAULT_REFERRAL_PERCENTAGE,
    DEFAULT_SUBSCRIPTION_DAYS,
};
use crate::store::AccountStore;

// ============================================================================
// In-Memory Account Store
// ============================================================================
//
// Reference implementation of the persistence contract. All state sits
// behind one RwLock; every mutation runs inside a single write guard, so
// uniqueness checks and increments are serialized and concurrent increments
// to the same user never lose an update.
//
// ============================================================================

#[derive(Default)]
struct Inner {
    users: HashMap<i64, User>,
    transactions: Vec<Transaction>,
    usage: Vec<UsageRecord>,
    next_user_id: i64,
    next_transaction_id: i64,
    next_usage_id: i64,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn user_mut(&mut self, id: i64) -> Result<&mut User, AccountError> {
        self.users.get_mut(&id).ok_or(AccountError::NotFound)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User, AccountError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        if inner
            .users
            .values()
            .any(|u| u.external_id == new.external_id)
        {
            return Err(AccountError::AlreadyExists(format!(
                "external_id {}",
                new.external_id
            )));
        }
        if inner
            .users
            .values()
            .any(|u| u.referral_hash == new.referral_hash)
        {
            return Err(AccountError::AlreadyExists(format!(
                "referral_hash {}",
                new.referral_hash
            )));
        }

        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            external_id: new.external_id,
            display_name: new.display_name,
            referral_hash: new.referral_hash,
            coins: new.coins,
            invited_count: 0,
            invited_by_hash: new.invited_by_hash,
            referral_earnings: 0,
            referral_percentage: DEFAULT_REFERRAL_PERCENTAGE,
            subscription_until: now + Duration::days(DEFAULT_SUBSCRIPTION_DAYS),
            registered_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&id).cloned())
    }

    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn user_by_referral_hash(&self, hash: &str) -> Result<Option<User>, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.referral_hash == hash)
            .cloned())
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<User, AccountError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        patch.apply(user)?;
        Ok(user.clone())
    }

    async fn adjust_coins(&self, id: i64, delta: i64) -> Result<User, AccountError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.coins += delta;
        Ok(user.clone())
    }

    async fn adjust_referral_earnings(&self, id: i64, delta: i64) -> Result<User, AccountError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.referral_earnings += delta;
        Ok(user.clone())
    }

    async fn increment_invited_count(&self, id: i64) -> Result<User, AccountError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.invited_count += 1;
        Ok(user.clone())
    }

    async fn extend_subscription(&self, id: i64, days: i64) -> Result<User, AccountError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.subscription_until += Duration::days(days);
        Ok(user.clone())
    }

    async fn set_subscription(&self, id: i64, until: DateTime<Utc>) -> Result<User, AccountError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.subscription_until = until;
        Ok(user.clone())
    }

    async fn list_users(&self) -> Result<Vec<User>, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().cloned().collect())
    }

    async fn list_referrals(&self, inviter_hash: &str) -> Result<Vec<User>, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .filter(|u| u.invited_by_hash.as_deref() == Some(inviter_hash))
            .cloned()
            .collect())
    }

    async fn count_users(&self) -> Result<i64, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner.users.len() as i64)
    }

    async fn delete_user(&self, id: i64) -> Result<bool, AccountError> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(&id).is_none() {
            return Ok(false);
        }
        // Cascade to owned rows.
        inner.transactions.retain(|t| t.user_id != id);
        inner.usage.retain(|u| u.user_id != id);
        Ok(true)
    }

    async fn insert_transaction(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
    ) -> Result<Transaction, AccountError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(AccountError::NotFound);
        }
        inner.next_transaction_id += 1;
        let transaction = Transaction {
            id: inner.next_transaction_id,
            user_id,
            amount,
            description: description.to_string(),
            created_at: now,
        };
        inner.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn transactions_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<Transaction>, AccountError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn transaction_total(&self, user_id: i64) -> Result<i64, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.amount)
            .sum())
    }

    async fn insert_usage(
        &self,
        user_id: i64,
        coins_used: i64,
    ) -> Result<UsageRecord, AccountError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(AccountError::NotFound);
        }
        inner.next_usage_id += 1;
        let record = UsageRecord {
            id: inner.next_usage_id,
            user_id,
            coins_used,
            used_at: now,
        };
        inner.usage.push(record.clone());
        Ok(record)
    }

    async fn usage_for_user_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, AccountError> {
        let inner = self.inner.read().await;
        Ok(inner
            .usage
            .iter()
            .filter(|u| u.user_id == user_id && u.used_at >= since)
            .cloned()
            .collect())
    }

    async fn usage_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, AccountError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<UsageRecord> = inner
            .usage
            .iter()
            .filter(|u| u.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.used_at.cmp(&a.used_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}
