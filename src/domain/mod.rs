// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// The five services that own the account invariants. Each one is an
// explicit struct taking the store handle (and, where time matters, the
// clock) as a constructor argument; there is no ambient global session.
//
// This layer is completely separate from the persistence implementations in
// src/store/.
//
// ============================================================================

pub mod errors;
pub mod ledger;
pub mod payment;
pub mod referral;
pub mod subscription;
pub mod usage;

pub use errors::AccountError;
pub use ledger::LedgerService;
pub use payment::ReferralPaymentProcessor;
pub use referral::{derive_referral_hash, ReferralResolver, REFERRAL_SIGNUP_BONUS};
pub use subscription::SubscriptionManager;
pub use usage::UsageTracker;
