use chrono::{DateTime, TimeDelta, Utc};

use super::schema::Database;
use super::types::StoreError;

impl Database {
    // ========================================================================
    // Import Locks
    // ========================================================================

    /// Atomically take the lock `key` unless an unexpired holder exists.
    ///
    /// Expired rows are overwritten in the same statement, so two callers
    /// racing for the same key cannot both succeed.
    pub async fn try_insert_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> Result<bool, StoreError> {
        let acquired_at = now.timestamp();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| StoreError::Invalid(format!("lock lifetime {ttl} out of range")))?
            .timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO import_locks (lock_key, acquired_at, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(lock_key) DO UPDATE SET
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE import_locks.expires_at <= ?
        "#,
        )
        .bind(key)
        .bind(acquired_at)
        .bind(expires_at)
        .bind(acquired_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_lock(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM import_locks WHERE lock_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Expiry of the current holder of `key`, if any.
    pub async fn lock_expiry(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT expires_at FROM import_locks WHERE lock_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(ts,)| DateTime::from_timestamp(ts, 0)))
    }
}
