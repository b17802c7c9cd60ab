use std::sync::Arc;

use crate::domain::errors::AccountError;
use crate::models::{Transaction, User};
use crate::store::AccountStore;

// ============================================================================
// Ledger Service - Balance & Earnings Mutations
// ============================================================================
//
// The live `coins` field is the canonical balance; the Transaction table is
// a derived audit view. Coin mutations do not append ledger rows by
// themselves; callers that want an audit trail record one explicitly, the
// way the facade's grant path does.
//
// ============================================================================

pub struct LedgerService {
    store: Arc<dyn AccountStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Credit `amount` coins. No ledger row is appended.
    pub async fn add_coins(&self, user_id: i64, amount: i64) -> Result<User, AccountError> {
        let user = self.store.adjust_coins(user_id, amount).await?;
        tracing::debug!(user_id, amount, balance = user.coins, "Coins credited");
        Ok(user)
    }

    /// Debit a positive magnitude. The balance may go negative; debt is
    /// allowed.
    pub async fn subtract_coins(&self, user_id: i64, amount: i64) -> Result<User, AccountError> {
        let user = self.store.adjust_coins(user_id, -amount).await?;
        tracing::debug!(user_id, amount, balance = user.coins, "Coins debited");
        Ok(user)
    }

    /// Credit the referral earnings accumulator, independent of `coins`.
    pub async fn add_referral_earnings(
        &self,
        user_id: i64,
        amount: i64,
    ) -> Result<User, AccountError> {
        self.store.adjust_referral_earnings(user_id, amount).await
    }

    /// Append an immutable audit row.
    pub async fn record_transaction(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
    ) -> Result<Transaction, AccountError> {
        self.store
            .insert_transaction(user_id, amount, description)
            .await
    }

    /// Canonical balance: the live `coins` field.
    pub async fn balance(&self, user_id: i64) -> Result<i64, AccountError> {
        let user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(AccountError::NotFound)?;
        Ok(user.coins)
    }

    /// Audit view: the sum of ledger rows. Diverges from `balance` whenever
    /// a coin mutation was not paired with a recorded transaction.
    pub async fn audit_balance(&self, user_id: i64) -> Result<i64, AccountError> {
        self.store.transaction_total(user_id).await
    }

    /// Ledger history, newest first.
    pub async fn transactions(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<Transaction>, AccountError> {
        self.store.transactions_for_user(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::NewUser;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, LedgerService, User) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser::new(1, "hash00000001"))
            .await
            .unwrap();
        let ledger = LedgerService::new(store.clone());
        (store, ledger, user)
    }

    #[tokio::test]
    async fn add_and_subtract_move_the_live_balance() {
        let (_, ledger, user) = setup().await;

        ledger.add_coins(user.id, 10).await.unwrap();
        let after = ledger.subtract_coins(user.id, 4).await.unwrap();
        assert_eq!(after.coins, 8);
        assert_eq!(ledger.balance(user.id).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn subtract_may_drive_balance_negative() {
        let (_, ledger, user) = setup().await;
        let after = ledger.subtract_coins(user.id, 100).await.unwrap();
        assert_eq!(after.coins, -98);
    }

    #[tokio::test]
    async fn mutations_on_unknown_user_fail() {
        let (_, ledger, _) = setup().await;
        assert!(matches!(
            ledger.add_coins(404, 1).await.unwrap_err(),
            AccountError::NotFound
        ));
        assert!(matches!(
            ledger.balance(404).await.unwrap_err(),
            AccountError::NotFound
        ));
    }

    #[tokio::test]
    async fn earnings_are_independent_of_coins() {
        let (_, ledger, user) = setup().await;
        let after = ledger.add_referral_earnings(user.id, 50).await.unwrap();
        assert_eq!(after.referral_earnings, 50);
        assert_eq!(after.coins, user.coins);
    }

    #[tokio::test]
    async fn audit_balance_diverges_without_recorded_rows() {
        let (_, ledger, user) = setup().await;

        ledger.add_coins(user.id, 10).await.unwrap();
        assert_eq!(ledger.audit_balance(user.id).await.unwrap(), 0);

        ledger
            .record_transaction(user.id, 10, "top-up")
            .await
            .unwrap();
        assert_eq!(ledger.audit_balance(user.id).await.unwrap(), 10);
        assert_eq!(ledger.balance(user.id).await.unwrap(), user.coins + 10);
    }

    #[tokio::test]
    async fn history_is_limited_and_newest_first() {
        let (_, ledger, user) = setup().await;
        for i in 0..5 {
            ledger
                .record_transaction(user.id, i, &format!("entry {i}"))
                .await
                .unwrap();
        }
        let rows = ledger.transactions(user.id, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].description, "entry 4");
    }
}
