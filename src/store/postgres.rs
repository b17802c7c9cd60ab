use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::errors::AccountError;
use crate::models::{
    NewUser, Transaction, UsageRecord, User, UserPatch, DEFAULT_REFERRAL_PERCENTAGE,
    DEFAULT_SUBSCRIPTION_DAYS,
};
use crate::store::AccountStore;

// ============================================================================
// Postgres Account Store
// ============================================================================
//
// Durable implementation of the persistence contract. Uniqueness is owned
// by the UNIQUE constraints on external_id and referral_hash; balance and
// counter mutations are single-statement `SET x = x + $n ... RETURNING`
// updates, so concurrent increments never lose an update. Deletes cascade
// through the foreign keys.
//
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                  BIGSERIAL PRIMARY KEY,
    external_id         BIGINT NOT NULL UNIQUE,
    display_name        TEXT,
    referral_hash       TEXT NOT NULL UNIQUE,
    coins               BIGINT NOT NULL DEFAULT 2,
    invited_count       BIGINT NOT NULL DEFAULT 0,
    invited_by_hash     TEXT,
    referral_earnings   BIGINT NOT NULL DEFAULT 0,
    referral_percentage BIGINT NOT NULL DEFAULT 5,
    subscription_until  TIMESTAMPTZ NOT NULL,
    registered_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_users_invited_by_hash ON users (invited_by_hash);

CREATE TABLE IF NOT EXISTS transactions (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    amount      BIGINT NOT NULL,
    description TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_transactions_user_id ON transactions (user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS usage_records (
    id         BIGSERIAL PRIMARY KEY,
    user_id    BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    coins_used BIGINT NOT NULL,
    used_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_usage_records_user_id ON usage_records (user_id, used_at DESC);
"#;

const USER_COLUMNS: &str = "id, external_id, display_name, referral_hash, coins, invited_count, \
     invited_by_hash, referral_earnings, referral_percentage, subscription_until, registered_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bootstrap the schema, the same way the service creates
    /// its tables on startup in the demo binary.
    pub async fn connect(database_url: &str) -> Result<Self, AccountError> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), AccountError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::debug!("Account schema ensured");
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        external_id: row.get("external_id"),
        display_name: row.get("display_name"),
        referral_hash: row.get("referral_hash"),
        coins: row.get("coins"),
        invited_count: row.get("invited_count"),
        invited_by_hash: row.get("invited_by_hash"),
        referral_earnings: row.get("referral_earnings"),
        referral_percentage: row.get("referral_percentage"),
        subscription_until: row.get("subscription_until"),
        registered_at: row.get("registered_at"),
    }
}

fn transaction_from_row(row: &PgRow) -> Transaction {
    Transaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

fn usage_from_row(row: &PgRow) -> UsageRecord {
    UsageRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        coins_used: row.get("coins_used"),
        used_at: row.get("used_at"),
    }
}

/// Surface unique-constraint violations as `AlreadyExists` so registration
/// races can be resolved by a retry lookup.
fn map_db_err(err: sqlx::Error) -> AccountError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return AccountError::AlreadyExists(db.message().to_string());
        }
    }
    AccountError::Database(err)
}

/// A foreign-key violation on an owned-row insert means the owning user is
/// gone.
fn map_fk_err(err: sqlx::Error) -> AccountError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23503") {
            return AccountError::NotFound;
        }
    }
    AccountError::Database(err)
}

#[async_trait]
impl AccountStore for PostgresStore {
    async fn create_user(&self, new: NewUser) -> Result<User, AccountError> {
        let sql = format!(
            "INSERT INTO users (external_id, display_name, referral_hash, coins, \
             invited_by_hash, referral_percentage, subscription_until) \
             VALUES ($1, $2, $3, $4, $5, $6, now() + ($7 * interval '1 day')) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.external_id)
            .bind(&new.display_name)
            .bind(&new.referral_hash)
            .bind(new.coins)
            .bind(&new.invited_by_hash)
            .bind(DEFAULT_REFERRAL_PERCENTAGE)
            .bind(DEFAULT_SUBSCRIPTION_DAYS)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(user_from_row(&row))
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, AccountError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>, AccountError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = $1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn user_by_referral_hash(&self, hash: &str) -> Result<Option<User>, AccountError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE referral_hash = $1");
        let row = sqlx::query(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<User, AccountError> {
        // Row-locked read-modify-write: the patch semantics (set-once
        // invited_by_hash) need the current row, so take the lock rather
        // than overwrite from a stale copy.
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AccountError::NotFound)?;

        let mut user = user_from_row(&row);
        patch.apply(&mut user)?;

        sqlx::query(
            "UPDATE users SET display_name = $2, coins = $3, invited_count = $4, \
             invited_by_hash = $5, referral_earnings = $6, referral_percentage = $7, \
             subscription_until = $8 WHERE id = $1",
        )
        .bind(id)
        .bind(&user.display_name)
        .bind(user.coins)
        .bind(user.invited_count)
        .bind(&user.invited_by_hash)
        .bind(user.referral_earnings)
        .bind(user.referral_percentage)
        .bind(user.subscription_until)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn adjust_coins(&self, id: i64, delta: i64) -> Result<User, AccountError> {
        let sql = format!(
            "UPDATE users SET coins = coins + $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(delta)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountError::NotFound)?;
        Ok(user_from_row(&row))
    }

    async fn adjust_referral_earnings(&self, id: i64, delta: i64) -> Result<User, AccountError> {
        let sql = format!(
            "UPDATE users SET referral_earnings = referral_earnings + $2 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(delta)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountError::NotFound)?;
        Ok(user_from_row(&row))
    }

    async fn increment_invited_count(&self, id: i64) -> Result<User, AccountError> {
        let sql = format!(
            "UPDATE users SET invited_count = invited_count + 1 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountError::NotFound)?;
        Ok(user_from_row(&row))
    }

    async fn extend_subscription(&self, id: i64, days: i64) -> Result<User, AccountError> {
        let sql = format!(
            "UPDATE users SET subscription_until = subscription_until + ($2 * interval '1 day') \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(days)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountError::NotFound)?;
        Ok(user_from_row(&row))
    }

    async fn set_subscription(&self, id: i64, until: DateTime<Utc>) -> Result<User, AccountError> {
        let sql = format!(
            "UPDATE users SET subscription_until = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(until)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountError::NotFound)?;
        Ok(user_from_row(&row))
    }

    async fn list_users(&self) -> Result<Vec<User>, AccountError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn list_referrals(&self, inviter_hash: &str) -> Result<Vec<User>, AccountError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE invited_by_hash = $1");
        let rows = sqlx::query(&sql)
            .bind(inviter_hash)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn count_users(&self) -> Result<i64, AccountError> {
        let row = sqlx::query("SELECT COUNT(*)::BIGINT AS count FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    async fn delete_user(&self, id: i64) -> Result<bool, AccountError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_transaction(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
    ) -> Result<Transaction, AccountError> {
        let row = sqlx::query(
            "INSERT INTO transactions (user_id, amount, description) VALUES ($1, $2, $3) \
             RETURNING id, user_id, amount, description, created_at",
        )
        .bind(user_id)
        .bind(amount)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(map_fk_err)?;
        Ok(transaction_from_row(&row))
    }

    async fn transactions_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<Transaction>, AccountError> {
        let rows = sqlx::query(
            "SELECT id, user_id, amount, description, created_at FROM transactions \
             WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(transaction_from_row).collect())
    }

    async fn transaction_total(&self, user_id: i64) -> Result<i64, AccountError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT AS total FROM transactions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    async fn insert_usage(
        &self,
        user_id: i64,
        coins_used: i64,
    ) -> Result<UsageRecord, AccountError> {
        let row = sqlx::query(
            "INSERT INTO usage_records (user_id, coins_used) VALUES ($1, $2) \
             RETURNING id, user_id, coins_used, used_at",
        )
        .bind(user_id)
        .bind(coins_used)
        .fetch_one(&self.pool)
        .await
        .map_err(map_fk_err)?;
        Ok(usage_from_row(&row))
    }

    async fn usage_for_user_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, AccountError> {
        let rows = sqlx::query(
            "SELECT id, user_id, coins_used, used_at FROM usage_records \
             WHERE user_id = $1 AND used_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(usage_from_row).collect())
    }

    async fn usage_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, AccountError> {
        let rows = sqlx::query(
            "SELECT id, user_id, coins_used, used_at FROM usage_records \
             WHERE user_id = $1 ORDER BY used_at DESC, id DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(usage_from_row).collect())
    }
}
