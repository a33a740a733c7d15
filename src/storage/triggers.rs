use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{trigger_from_row, ScheduledTrigger, StoreError, TriggerRow};
use crate::schedule::{Recurrence, TriggerArgs};
use crate::traits::JobScheduler;

#[async_trait]
impl JobScheduler for Database {
    async fn clear_all(&self, hook: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM scheduled_triggers WHERE hook = ?")
            .bind(hook)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Register a trigger. A trigger with the same hook and argument tuple
    /// is left untouched.
    async fn schedule_recurring(
        &self,
        hook: &str,
        first_fire: DateTime<Utc>,
        recurrence: Recurrence,
        args: &TriggerArgs,
    ) -> Result<(), StoreError> {
        let args_json = serde_json::to_string(args)?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO scheduled_triggers (hook, args_key, args, recurrence, next_fire_at)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(hook)
        .bind(args.canonical_key())
        .bind(&args_json)
        .bind(recurrence.name())
        .bind(first_fire.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_scheduled(&self, hook: &str, args: &TriggerArgs) -> Result<bool, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM scheduled_triggers WHERE hook = ? AND args_key = ?")
                .bind(hook)
                .bind(args.canonical_key())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn scheduled(&self, hook: &str) -> Result<Vec<ScheduledTrigger>, StoreError> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT hook, args, recurrence, next_fire_at
            FROM scheduled_triggers
            WHERE hook = ?
            ORDER BY next_fire_at, args_key
        "#,
        )
        .bind(hook)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trigger_from_row).collect()
    }
}

impl Database {
    // ========================================================================
    // Due Trigger Claiming
    // ========================================================================

    /// Claim every trigger under `hook` due at or before `now`.
    ///
    /// Each claimed trigger's next fire time is advanced by whole periods
    /// until it lies after `now`, so a host that was down for a while fires
    /// each trigger once rather than once per missed period. The returned
    /// triggers carry the fire time that was due.
    pub async fn claim_due(
        &self,
        hook: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTrigger>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT hook, args, recurrence, next_fire_at
            FROM scheduled_triggers
            WHERE hook = ? AND next_fire_at <= ?
            ORDER BY next_fire_at, args_key
        "#,
        )
        .bind(hook)
        .bind(now.timestamp())
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let trigger = match trigger_from_row(row) {
                Ok(trigger) => trigger,
                Err(e) => {
                    tracing::warn!(hook = hook, error = %e, "Skipping unreadable trigger");
                    continue;
                }
            };

            let next = advance_past(trigger.next_fire_at, trigger.recurrence, now);
            sqlx::query(
                "UPDATE scheduled_triggers SET next_fire_at = ? WHERE hook = ? AND args_key = ?",
            )
            .bind(next.timestamp())
            .bind(hook)
            .bind(trigger.args.canonical_key())
            .execute(&mut *tx)
            .await?;

            claimed.push(trigger);
        }

        tx.commit().await?;
        Ok(claimed)
    }
}

/// Smallest `due + k * period` (k >= 1) strictly after `now`.
fn advance_past(due: DateTime<Utc>, recurrence: Recurrence, now: DateTime<Utc>) -> DateTime<Utc> {
    let period = recurrence.period().num_seconds();
    let behind = (now - due).num_seconds().max(0);
    let steps = behind / period + 1;
    due + chrono::TimeDelta::seconds(steps * period)
}
