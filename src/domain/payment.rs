use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::errors::AccountError;
use crate::domain::ledger::LedgerService;
use crate::domain::subscription::SubscriptionManager;
use crate::models::PaymentOutcome;
use crate::store::AccountStore;

// ============================================================================
// Referral Payment Processor
// ============================================================================
//
// The one multi-step operation in the core: credit the payer, extend their
// subscription, and pay the referrer's percentage. Runs as a compensable
// saga so no partial effect stays observable after a reported failure.
//
// ============================================================================

pub struct ReferralPaymentProcessor {
    store: Arc<dyn AccountStore>,
    ledger: LedgerService,
    subscriptions: SubscriptionManager,
}

impl ReferralPaymentProcessor {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: LedgerService::new(store.clone()),
            subscriptions: SubscriptionManager::new(store.clone(), clock),
            store,
        }
    }

    /// Apply a payment event: `coins_to_add` coins and `days_to_add`
    /// subscription days to the payer; then, if the payer was invited,
    /// `floor(payment_amount * referral_percentage / 100)` to the
    /// referrer's earnings.
    pub async fn process(
        &self,
        user_id: i64,
        coins_to_add: i64,
        days_to_add: i64,
        payment_amount: f64,
    ) -> Result<PaymentOutcome, AccountError> {
        let payer = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(AccountError::NotFound)?;

        self.ledger.add_coins(user_id, coins_to_add).await?;

        if let Err(err) = self
            .subscriptions
            .extend_subscription(user_id, days_to_add)
            .await
        {
            tracing::warn!(user_id, error = %err, "Subscription step failed, compensating coins");
            self.ledger.subtract_coins(user_id, coins_to_add).await?;
            return Err(err);
        }

        let mut outcome = PaymentOutcome {
            coins_added: coins_to_add,
            days_added: days_to_add,
            referrer_id: None,
            referrer_bonus: 0,
        };

        // A dangling inviter hash (referrer deleted since) is harmless: the
        // payment itself still applies, there is just nobody to pay.
        if let Some(inviter_hash) = &payer.invited_by_hash {
            if let Some(referrer) = self.store.user_by_referral_hash(inviter_hash).await? {
                let bonus =
                    (payment_amount * referrer.referral_percentage as f64 / 100.0).floor() as i64;

                if let Err(err) = self.ledger.add_referral_earnings(referrer.id, bonus).await {
                    tracing::warn!(
                        user_id,
                        referrer_id = referrer.id,
                        error = %err,
                        "Referrer credit failed, compensating payer"
                    );
                    self.ledger.subtract_coins(user_id, coins_to_add).await?;
                    self.subscriptions
                        .extend_subscription(user_id, -days_to_add)
                        .await?;
                    return Err(err);
                }

                tracing::info!(
                    user_id,
                    referrer_id = referrer.id,
                    bonus,
                    payment_amount,
                    "Referral earnings credited"
                );
                outcome.referrer_id = Some(referrer.id);
                outcome.referrer_bonus = bonus;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::SystemClock;
    use crate::domain::referral::ReferralResolver;
    use crate::store::MemoryStore;
    use chrono::Duration;

    struct Setup {
        store: Arc<MemoryStore>,
        processor: ReferralPaymentProcessor,
        resolver: ReferralResolver,
    }

    fn setup() -> Setup {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Setup {
            processor: ReferralPaymentProcessor::new(store.clone(), clock),
            resolver: ReferralResolver::new(store.clone()),
            store,
        }
    }

    #[tokio::test]
    async fn payment_credits_payer_and_referrer() {
        let s = setup();
        let referrer = s.resolver.register_or_fetch(1, None, None).await.unwrap();
        let payer = s
            .resolver
            .register_or_fetch(2, None, Some(&referrer.referral_hash))
            .await
            .unwrap();

        let outcome = s
            .processor
            .process(payer.id, 50, 30, 1000.0)
            .await
            .unwrap();

        assert_eq!(outcome.coins_added, 50);
        assert_eq!(outcome.days_added, 30);
        assert_eq!(outcome.referrer_id, Some(referrer.id));
        assert_eq!(outcome.referrer_bonus, 50); // 1000 * 5 / 100

        let payer_after = s.store.user_by_id(payer.id).await.unwrap().unwrap();
        assert_eq!(payer_after.coins, payer.coins + 50);
        assert_eq!(
            payer_after.subscription_until,
            payer.subscription_until + Duration::days(30)
        );

        let referrer_after = s.store.user_by_id(referrer.id).await.unwrap().unwrap();
        assert_eq!(referrer_after.referral_earnings, 50);
        // Earnings land in the separate accumulator, not in coins.
        assert_eq!(referrer_after.coins, 2 + 1);
    }

    #[tokio::test]
    async fn bonus_is_floored() {
        let s = setup();
        let referrer = s.resolver.register_or_fetch(1, None, None).await.unwrap();
        let payer = s
            .resolver
            .register_or_fetch(2, None, Some(&referrer.referral_hash))
            .await
            .unwrap();

        let outcome = s.processor.process(payer.id, 0, 0, 999.0).await.unwrap();
        assert_eq!(outcome.referrer_bonus, 49); // floor(999 * 0.05)
    }

    #[tokio::test]
    async fn payment_without_inviter_pays_no_bonus() {
        let s = setup();
        let payer = s.resolver.register_or_fetch(1, None, None).await.unwrap();

        let outcome = s.processor.process(payer.id, 10, 7, 500.0).await.unwrap();
        assert_eq!(outcome.referrer_id, None);
        assert_eq!(outcome.referrer_bonus, 0);
    }

    #[tokio::test]
    async fn dangling_inviter_hash_is_harmless() {
        let s = setup();
        let referrer = s.resolver.register_or_fetch(1, None, None).await.unwrap();
        let payer = s
            .resolver
            .register_or_fetch(2, None, Some(&referrer.referral_hash))
            .await
            .unwrap();
        s.store.delete_user(referrer.id).await.unwrap();

        let outcome = s.processor.process(payer.id, 10, 7, 500.0).await.unwrap();
        assert_eq!(outcome.referrer_id, None);
        assert_eq!(outcome.referrer_bonus, 0);

        let payer_after = s.store.user_by_id(payer.id).await.unwrap().unwrap();
        assert_eq!(payer_after.coins, payer.coins + 10);
    }

    #[tokio::test]
    async fn unknown_payer_fails_before_any_mutation() {
        let s = setup();
        let err = s.processor.process(404, 10, 7, 500.0).await.unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
    }

    #[tokio::test]
    async fn custom_referral_percentage_is_honored() {
        let s = setup();
        let referrer = s.resolver.register_or_fetch(1, None, None).await.unwrap();
        let payer = s
            .resolver
            .register_or_fetch(2, None, Some(&referrer.referral_hash))
            .await
            .unwrap();

        s.store
            .update_user(
                referrer.id,
                crate::models::UserPatch {
                    referral_percentage: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = s.processor.process(payer.id, 0, 0, 1000.0).await.unwrap();
        assert_eq!(outcome.referrer_bonus, 200);
    }
}
