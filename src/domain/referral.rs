use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::domain::errors::AccountError;
use crate::models::{NewUser, User};
use crate::store::AccountStore;

// ============================================================================
// Referral Resolver - Registration & Inviter Attribution
// ============================================================================
//
// Runs only at registration time. Decides whether a supplied referral hash
// should be honored, creates the user, and pays the inviter's signup bonus.
// All later commands operate on the existing aggregate directly.
//
// ============================================================================

/// Coins paid to the inviter for each successful referral.
pub const REFERRAL_SIGNUP_BONUS: i64 = 1;

/// Length of the shareable invite token.
pub const REFERRAL_HASH_LEN: usize = 12;

/// Derive the shareable invite token from the platform identity: the first
/// 12 hex characters of SHA-256 over the decimal rendering of the id.
/// Deterministic, so the same external id always yields the same hash.
pub fn derive_referral_hash(external_id: i64) -> String {
    let digest = Sha256::digest(external_id.to_string().as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(REFERRAL_HASH_LEN);
    hash
}

pub struct ReferralResolver {
    store: Arc<dyn AccountStore>,
}

impl ReferralResolver {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Fetch the existing user for `external_id`, or create one with
    /// referral attribution. Idempotent: a second call with the same id
    /// returns the existing user and performs no inviter side effects.
    pub async fn register_or_fetch(
        &self,
        external_id: i64,
        display_name: Option<&str>,
        candidate_inviter_hash: Option<&str>,
    ) -> Result<User, AccountError> {
        if let Some(user) = self.store.user_by_external_id(external_id).await? {
            return Ok(user);
        }

        let own_hash = derive_referral_hash(external_id);

        // An unknown inviter hash is silently ignored, not an error.
        let inviter = match candidate_inviter_hash {
            Some(candidate) => self.resolve_inviter(candidate, &own_hash).await?,
            None => None,
        };

        let mut new = NewUser::new(external_id, own_hash);
        new.display_name = display_name.map(str::to_string);
        new.invited_by_hash = inviter.as_ref().map(|u| u.referral_hash.clone());

        let user = match self.store.create_user(new).await {
            Ok(user) => user,
            // Lost a first-contact race; the store's uniqueness constraint
            // is the authority, so fall back to the winner's row.
            Err(err) if err.is_duplicate() => {
                tracing::debug!(external_id, "Registration race lost, fetching existing user");
                return self
                    .store
                    .user_by_external_id(external_id)
                    .await?
                    .ok_or(AccountError::NotFound);
            }
            Err(err) => return Err(err),
        };

        if let Some(inviter) = inviter {
            self.store.increment_invited_count(inviter.id).await?;
            self.store
                .adjust_coins(inviter.id, REFERRAL_SIGNUP_BONUS)
                .await?;
            tracing::info!(
                inviter_id = inviter.id,
                invited_external_id = external_id,
                bonus = REFERRAL_SIGNUP_BONUS,
                "Referral attributed"
            );
        }

        Ok(user)
    }

    async fn resolve_inviter(
        &self,
        candidate: &str,
        own_hash: &str,
    ) -> Result<Option<User>, AccountError> {
        let inviter = match self.store.user_by_referral_hash(candidate).await? {
            Some(user) => user,
            None => return Ok(None),
        };

        // Defensive guard: with a deterministic, collision-free derivation a
        // brand-new user can never hold the candidate hash, but an invalid
        // attribution must not slip through if that assumption breaks.
        if inviter.referral_hash == own_hash {
            tracing::warn!(hash = own_hash, "Self-referral attempt ignored");
            return Ok(None);
        }

        Ok(Some(inviter))
    }
}
