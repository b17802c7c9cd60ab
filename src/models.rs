use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::AccountError;

// ============================================================================
// Domain Models
// ============================================================================

/// Coins granted to a brand-new account.
pub const DEFAULT_STARTING_COINS: i64 = 2;

/// Trial subscription length granted at registration, in days.
pub const DEFAULT_SUBSCRIPTION_DAYS: i64 = 3;

/// Default share (percent) of a referred payment paid to the referrer.
pub const DEFAULT_REFERRAL_PERCENTAGE: i64 = 5;

/// The account aggregate. Single source of truth for balance, subscription
/// expiry, and referral attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned internal identifier, immutable.
    pub id: i64,
    /// Messaging-platform identity. Unique, immutable after creation.
    pub external_id: i64,
    pub display_name: Option<String>,
    /// 12-character shareable invite token, derived from `external_id`.
    /// Unique and immutable.
    pub referral_hash: String,
    /// Spendable balance. No floor is enforced; a negative value represents
    /// debt.
    pub coins: i64,
    /// Successful referrals attributed to this user.
    pub invited_count: i64,
    /// Inviter's referral hash. Set once at creation, never reassigned.
    /// A weak reference: the inviter may have been deleted since.
    pub invited_by_hash: Option<String>,
    /// Accumulator credited by payment attribution only, separate from
    /// `coins`.
    pub referral_earnings: i64,
    /// Share (0..=100) of a referred payment paid to this user when acting
    /// as referrer.
    pub referral_percentage: i64,
    /// Subscription expiry. "Active" is `subscription_until > now`, computed
    /// by callers at read time.
    pub subscription_until: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Fields supplied by the caller when creating a user. The store assigns
/// `id`, `registered_at`, and the initial `subscription_until`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: i64,
    pub referral_hash: String,
    pub display_name: Option<String>,
    pub invited_by_hash: Option<String>,
    pub coins: i64,
}

impl NewUser {
    pub fn new(external_id: i64, referral_hash: impl Into<String>) -> Self {
        Self {
            external_id,
            referral_hash: referral_hash.into(),
            display_name: None,
            invited_by_hash: None,
            coins: DEFAULT_STARTING_COINS,
        }
    }
}

/// Enumerated whitelist of the mutable `User` fields. Anything not
/// representable here cannot be updated, so unknown fields are rejected by
/// construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    pub coins: Option<i64>,
    pub invited_count: Option<i64>,
    /// Only honored while the user has no inviter yet; reassignment is
    /// rejected with `ImmutableField`.
    pub invited_by_hash: Option<String>,
    pub referral_earnings: Option<i64>,
    pub referral_percentage: Option<i64>,
    pub subscription_until: Option<DateTime<Utc>>,
    pub display_name: Option<String>,
}

impl UserPatch {
    /// Validate field-level constraints before any mutation is attempted.
    pub fn validate(&self) -> Result<(), AccountError> {
        if let Some(pct) = self.referral_percentage {
            if !(0..=100).contains(&pct) {
                return Err(AccountError::InvalidPercentage(pct));
            }
        }
        Ok(())
    }

    /// Apply the patch to an aggregate, enforcing the set-once rule for
    /// `invited_by_hash`.
    pub fn apply(self, user: &mut User) -> Result<(), AccountError> {
        self.validate()?;

        if let Some(hash) = self.invited_by_hash {
            match &user.invited_by_hash {
                Some(existing) if *existing != hash => {
                    return Err(AccountError::ImmutableField("invited_by_hash"));
                }
                _ => user.invited_by_hash = Some(hash),
            }
        }
        if let Some(coins) = self.coins {
            user.coins = coins;
        }
        if let Some(count) = self.invited_count {
            user.invited_count = count;
        }
        if let Some(earnings) = self.referral_earnings {
            user.referral_earnings = earnings;
        }
        if let Some(pct) = self.referral_percentage {
            user.referral_percentage = pct;
        }
        if let Some(until) = self.subscription_until {
            user.subscription_until = until;
        }
        if let Some(name) = self.display_name {
            user.display_name = Some(name);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_none()
            && self.invited_count.is_none()
            && self.invited_by_hash.is_none()
            && self.referral_earnings.is_none()
            && self.referral_percentage.is_none()
            && self.subscription_until.is_none()
            && self.display_name.is_none()
    }
}

/// Immutable ledger entry. Append-only; never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    /// Signed amount: positive for credits, negative for debits.
    pub amount: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable consumption entry. Recording usage does not debit `coins`;
/// callers that charge for usage also go through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: i64,
    pub user_id: i64,
    pub coins_used: i64,
    pub used_at: DateTime<Utc>,
}

/// Rolling consumption statistics over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub period_days: i64,
    pub total_usages: i64,
    pub total_coins_used: i64,
    /// 0.0 when there are no usages in the window.
    pub average_per_usage: f64,
}

/// Store-wide aggregate numbers for administrative reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStats {
    pub users_count: i64,
    pub total_coins: i64,
    /// 0.0 when the store is empty.
    pub average_coins: f64,
}

/// Result of processing a payment event, including the referrer attribution
/// when one applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub coins_added: i64,
    pub days_added: i64,
    pub referrer_id: Option<i64>,
    pub referrer_bonus: i64,
}

/// How administrative commands address an account: by the platform identity
/// or by the shareable referral hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountRef {
    ExternalId(i64),
    Hash(String),
}
