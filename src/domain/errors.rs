// ============================================================================
// Account Business Rule Errors
// ============================================================================
//
// Absence on read paths is `Option::None`, never an error; `NotFound` is
// reserved for mutations addressed at a missing user.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("User not found")]
    NotFound,

    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error("Referral percentage must be within 0..=100, got {0}")]
    InvalidPercentage(i64),

    #[error("Usage amount cannot be negative: {0}")]
    NegativeUsage(i64),

    #[error("Field cannot be reassigned: {0}")]
    ImmutableField(&'static str),

    #[error("A user cannot be invited by their own referral hash")]
    SelfReferral,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AccountError {
    /// Duplicate-create races surface as `AlreadyExists`; callers resolve
    /// them by retrying with a plain lookup.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AccountError::AlreadyExists(_))
    }
}
