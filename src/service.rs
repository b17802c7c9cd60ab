use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::domain::errors::AccountError;
use crate::domain::ledger::LedgerService;
use crate::domain::payment::ReferralPaymentProcessor;
use crate::domain::referral::ReferralResolver;
use crate::domain::subscription::SubscriptionManager;
use crate::domain::usage::UsageTracker;
use crate::models::{
    AccountRef, AccountStats, PaymentOutcome, Transaction, UsageStats, User, UserPatch,
};
use crate::store::AccountStore;

// ============================================================================
// Account Service - External Interface
// ============================================================================
//
// The narrow operation set consumed by the command layer. The transport
// supplies a stable (external_id, display_name) pair per request; everything
// else stays inside the core. Read operations surface absence as None so
// command handlers can render a user-facing "not found"; mutations addressed
// at a missing user fail with NotFound.
//
// ============================================================================

pub struct AccountService {
    store: Arc<dyn AccountStore>,
    resolver: ReferralResolver,
    ledger: LedgerService,
    subscriptions: SubscriptionManager,
    usage: UsageTracker,
    payments: ReferralPaymentProcessor,
}

impl AccountService {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver: ReferralResolver::new(store.clone()),
            ledger: LedgerService::new(store.clone()),
            subscriptions: SubscriptionManager::new(store.clone(), clock.clone()),
            usage: UsageTracker::new(store.clone(), clock.clone()),
            payments: ReferralPaymentProcessor::new(store.clone(), clock),
            store,
        }
    }

    async fn resolve(&self, account: &AccountRef) -> Result<User, AccountError> {
        let user = match account {
            AccountRef::ExternalId(external_id) => {
                self.store.user_by_external_id(*external_id).await?
            }
            AccountRef::Hash(hash) => self.store.user_by_referral_hash(hash).await?,
        };
        user.ok_or(AccountError::NotFound)
    }

    async fn require_by_external_id(&self, external_id: i64) -> Result<User, AccountError> {
        self.store
            .user_by_external_id(external_id)
            .await?
            .ok_or(AccountError::NotFound)
    }

    /// First contact or repeat visit; see `ReferralResolver`.
    pub async fn register_or_fetch(
        &self,
        external_id: i64,
        display_name: Option<&str>,
        inviter_hash: Option<&str>,
    ) -> Result<User, AccountError> {
        self.resolver
            .register_or_fetch(external_id, display_name, inviter_hash)
            .await
    }

    pub async fn get_profile(&self, external_id: i64) -> Result<Option<User>, AccountError> {
        self.store.user_by_external_id(external_id).await
    }

    pub async fn get_balance(&self, external_id: i64) -> Result<Option<i64>, AccountError> {
        Ok(self
            .store
            .user_by_external_id(external_id)
            .await?
            .map(|u| u.coins))
    }

    /// Users invited by the owner of `owner_hash`.
    pub async fn list_referrals(&self, owner_hash: &str) -> Result<Vec<User>, AccountError> {
        self.store.list_referrals(owner_hash).await
    }

    /// Administrative credit: coins plus subscription days, with an audit
    /// row in the ledger.
    pub async fn grant_coins_and_days(
        &self,
        external_id: i64,
        coins: i64,
        days: i64,
    ) -> Result<User, AccountError> {
        let user = self.require_by_external_id(external_id).await?;

        self.ledger.add_coins(user.id, coins).await?;
        let user = self.subscriptions.extend_subscription(user.id, days).await?;
        self.ledger
            .record_transaction(user.id, coins, &format!("Grant: {coins} coins, {days} days"))
            .await?;

        tracing::info!(external_id, coins, days, "Grant applied");
        Ok(user)
    }

    pub async fn credit_referral_earnings(
        &self,
        account: &AccountRef,
        amount: i64,
    ) -> Result<User, AccountError> {
        let user = self.resolve(account).await?;
        self.ledger.add_referral_earnings(user.id, amount).await
    }

    pub async fn set_referral_percentage(
        &self,
        account: &AccountRef,
        percentage: i64,
    ) -> Result<User, AccountError> {
        if !(0..=100).contains(&percentage) {
            return Err(AccountError::InvalidPercentage(percentage));
        }
        let user = self.resolve(account).await?;
        self.store
            .update_user(
                user.id,
                UserPatch {
                    referral_percentage: Some(percentage),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn list_all_accounts(&self) -> Result<Vec<User>, AccountError> {
        self.store.list_users().await
    }

    /// Count, total coins, average balance. All zero on an empty store.
    pub async fn account_stats(&self) -> Result<AccountStats, AccountError> {
        let users = self.store.list_users().await?;
        let users_count = users.len() as i64;
        let total_coins: i64 = users.iter().map(|u| u.coins).sum();
        let average_coins = if users_count == 0 {
            0.0
        } else {
            total_coins as f64 / users_count as f64
        };
        Ok(AccountStats {
            users_count,
            total_coins,
            average_coins,
        })
    }

    pub async fn record_usage(
        &self,
        external_id: i64,
        coins_used: i64,
    ) -> Result<(), AccountError> {
        let user = self.require_by_external_id(external_id).await?;
        self.usage.record_usage(user.id, coins_used).await?;
        Ok(())
    }

    pub async fn usage_stats(
        &self,
        external_id: i64,
        window_days: i64,
    ) -> Result<Option<UsageStats>, AccountError> {
        let user = match self.store.user_by_external_id(external_id).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        Ok(Some(self.usage.usage_stats(user.id, window_days).await?))
    }

    pub async fn process_payment(
        &self,
        external_id: i64,
        coins_to_add: i64,
        days_to_add: i64,
        payment_amount: f64,
    ) -> Result<PaymentOutcome, AccountError> {
        let user = self.require_by_external_id(external_id).await?;
        self.payments
            .process(user.id, coins_to_add, days_to_add, payment_amount)
            .await
    }

    /// Administrative removal; cascades to the user's transactions and
    /// usage records.
    pub async fn delete_account(&self, external_id: i64) -> Result<bool, AccountError> {
        match self.store.user_by_external_id(external_id).await? {
            Some(user) => self.store.delete_user(user.id).await,
            None => Ok(false),
        }
    }

    pub async fn transaction_history(
        &self,
        external_id: i64,
        limit: usize,
    ) -> Result<Option<Vec<Transaction>>, AccountError> {
        let user = match self.store.user_by_external_id(external_id).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        Ok(Some(self.ledger.transactions(user.id, limit).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::referral::derive_referral_hash;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn service() -> AccountService {
        AccountService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn fresh_registration_scenario() {
        let svc = service();
        let user = svc.register_or_fetch(42, Some("alice"), None).await.unwrap();

        assert_eq!(user.coins, 2);
        assert!(user.invited_by_hash.is_none());
        assert_eq!(user.referral_hash, derive_referral_hash(42));

        let profile = svc.get_profile(42).await.unwrap().unwrap();
        assert_eq!(profile.id, user.id);
        assert_eq!(svc.get_balance(42).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn absent_users_read_as_none() {
        let svc = service();
        assert!(svc.get_profile(404).await.unwrap().is_none());
        assert!(svc.get_balance(404).await.unwrap().is_none());
        assert!(svc.usage_stats(404, 7).await.unwrap().is_none());
        assert!(svc.transaction_history(404, 10).await.unwrap().is_none());
        assert!(!svc.delete_account(404).await.unwrap());
    }

    #[tokio::test]
    async fn grant_extends_and_leaves_an_audit_row() {
        let svc = service();
        let user = svc.register_or_fetch(1, None, None).await.unwrap();

        let after = svc.grant_coins_and_days(1, 25, 7).await.unwrap();
        assert_eq!(after.coins, user.coins + 25);
        assert_eq!(
            after.subscription_until,
            user.subscription_until + Duration::days(7)
        );

        let history = svc.transaction_history(1, 10).await.unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, 25);
    }

    #[tokio::test]
    async fn referrals_are_listed_for_the_owner_hash() {
        let svc = service();
        let owner = svc.register_or_fetch(1, None, None).await.unwrap();
        svc.register_or_fetch(2, None, Some(&owner.referral_hash))
            .await
            .unwrap();
        svc.register_or_fetch(3, None, Some(&owner.referral_hash))
            .await
            .unwrap();
        svc.register_or_fetch(4, None, None).await.unwrap();

        let referrals = svc.list_referrals(&owner.referral_hash).await.unwrap();
        assert_eq!(referrals.len(), 2);

        let owner = svc.get_profile(1).await.unwrap().unwrap();
        assert_eq!(owner.invited_count, 2);
    }

    #[tokio::test]
    async fn account_ref_addresses_by_id_or_hash() {
        let svc = service();
        let user = svc.register_or_fetch(1, None, None).await.unwrap();

        let by_id = svc
            .credit_referral_earnings(&AccountRef::ExternalId(1), 10)
            .await
            .unwrap();
        assert_eq!(by_id.referral_earnings, 10);

        let by_hash = svc
            .credit_referral_earnings(&AccountRef::Hash(user.referral_hash.clone()), 5)
            .await
            .unwrap();
        assert_eq!(by_hash.referral_earnings, 15);
    }

    #[tokio::test]
    async fn percentage_is_validated_before_lookup() {
        let svc = service();
        // Even for a missing user the argument is rejected first.
        let err = svc
            .set_referral_percentage(&AccountRef::ExternalId(404), 101)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidPercentage(101)));

        svc.register_or_fetch(1, None, None).await.unwrap();
        let user = svc
            .set_referral_percentage(&AccountRef::ExternalId(1), 0)
            .await
            .unwrap();
        assert_eq!(user.referral_percentage, 0);
        let user = svc
            .set_referral_percentage(&AccountRef::ExternalId(1), 100)
            .await
            .unwrap();
        assert_eq!(user.referral_percentage, 100);
    }

    #[tokio::test]
    async fn stats_over_empty_and_populated_store() {
        let svc = service();
        assert_eq!(
            svc.account_stats().await.unwrap(),
            AccountStats {
                users_count: 0,
                total_coins: 0,
                average_coins: 0.0,
            }
        );

        svc.register_or_fetch(1, None, None).await.unwrap();
        svc.register_or_fetch(2, None, None).await.unwrap();
        svc.grant_coins_and_days(1, 8, 0).await.unwrap();

        let stats = svc.account_stats().await.unwrap();
        assert_eq!(stats.users_count, 2);
        assert_eq!(stats.total_coins, 12); // 2 + 2 starting, plus the 8 granted
        assert_eq!(stats.average_coins, 6.0);
    }

    #[tokio::test]
    async fn end_to_end_payment_flow() {
        let svc = service();
        let referrer = svc.register_or_fetch(1, None, None).await.unwrap();
        svc.register_or_fetch(2, None, Some(&referrer.referral_hash))
            .await
            .unwrap();

        let outcome = svc.process_payment(2, 50, 30, 1000.0).await.unwrap();
        assert_eq!(outcome.referrer_bonus, 50);

        let referrer = svc.get_profile(1).await.unwrap().unwrap();
        assert_eq!(referrer.referral_earnings, 50);
    }

    #[tokio::test]
    async fn usage_flow_through_the_facade() {
        let svc = service();
        svc.register_or_fetch(1, None, None).await.unwrap();

        svc.record_usage(1, 3).await.unwrap();
        svc.record_usage(1, 5).await.unwrap();

        let stats = svc.usage_stats(1, 7).await.unwrap().unwrap();
        assert_eq!(stats.total_usages, 2);
        assert_eq!(stats.total_coins_used, 8);
        assert_eq!(stats.average_per_usage, 4.0);

        // Usage never debits coins by itself.
        assert_eq!(svc.get_balance(1).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn delete_account_removes_user_and_history() {
        let svc = service();
        svc.register_or_fetch(1, None, None).await.unwrap();
        svc.grant_coins_and_days(1, 5, 1).await.unwrap();

        assert!(svc.delete_account(1).await.unwrap());
        assert!(svc.get_profile(1).await.unwrap().is_none());
    }
}
