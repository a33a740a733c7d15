use async_trait::async_trait;

use super::schema::Database;
use super::types::{feed_from_row, FeedConfig, FeedDraft, FeedRow, StoreError};
use crate::traits::FeedStore;

#[async_trait]
impl FeedStore for Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// All feeds in creation order
    async fn list_feeds(&self) -> Result<Vec<FeedConfig>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            "SELECT id, url, category_id, tags, schedule FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    async fn get_feed(&self, id: i64) -> Result<Option<FeedConfig>, StoreError> {
        let row: Option<FeedRow> = sqlx::query_as(
            "SELECT id, url, category_id, tags, schedule FROM feeds WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(feed_from_row))
    }

    // ========================================================================
    // Feed Mutations
    // ========================================================================

    async fn insert_feed(&self, draft: &FeedDraft) -> Result<i64, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let tags = serde_json::to_string(&draft.tags)?;
        let schedule = serde_json::to_string(&draft.schedule)?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, category_id, tags, schedule, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&draft.url)
        .bind(draft.category_id)
        .bind(&tags)
        .bind(&schedule)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_feed(&self, id: i64, draft: &FeedDraft) -> Result<bool, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let tags = serde_json::to_string(&draft.tags)?;
        let schedule = serde_json::to_string(&draft.schedule)?;

        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET url = ?, category_id = ?, tags = ?, schedule = ?, updated_at = ?
            WHERE id = ?
        "#,
        )
        .bind(&draft.url)
        .bind(draft.category_id)
        .bind(&tags)
        .bind(&schedule)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_feed(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::schedule::{Schedule, ScheduleError, TriggerRegistry, IMPORT_HOOK};
    use crate::storage::{Database, FeedDraft};
    use crate::traits::{FeedStore, JobScheduler};
    use chrono::Utc;
    use std::sync::Arc;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_draft(n: i64) -> FeedDraft {
        FeedDraft::new(format!("https://feed{}.example.com/rss", n))
            .with_tags_text("podcast, news")
            .with_schedule(Schedule::Time {
                time: "07:00".into(),
            })
    }

    #[tokio::test]
    async fn test_insert_and_get_feed() {
        let db = test_db().await;
        let id = db.insert_feed(&test_draft(1).with_category(Some(4))).await.unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.id, id);
        assert_eq!(feed.url, "https://feed1.example.com/rss");
        assert_eq!(feed.category_id, Some(4));
        assert_eq!(feed.tags, vec!["podcast", "news"]);
        assert_eq!(
            feed.schedule,
            Schedule::Time {
                time: "07:00".into()
            }
        );
    }

    #[tokio::test]
    async fn test_get_missing_feed() {
        let db = test_db().await;
        assert!(db.get_feed(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_feed_in_place() {
        let db = test_db().await;
        let id = db.insert_feed(&test_draft(1)).await.unwrap();

        let edited = FeedDraft::new("https://moved.example.com/rss").with_schedule(Schedule::None);
        assert!(db.update_feed(id, &edited).await.unwrap());

        let feeds = db.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, id);
        assert_eq!(feeds[0].url, "https://moved.example.com/rss");
        assert_eq!(feeds[0].schedule, Schedule::None);
        assert!(feeds[0].tags.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_feed_returns_false() {
        let db = test_db().await;
        assert!(!db.update_feed(99, &test_draft(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_keeps_other_ids_stable() {
        let db = test_db().await;
        let first = db.insert_feed(&test_draft(1)).await.unwrap();
        let second = db.insert_feed(&test_draft(2)).await.unwrap();
        let third = db.insert_feed(&test_draft(3)).await.unwrap();

        assert!(db.delete_feed(first).await.unwrap());
        assert!(!db.delete_feed(first).await.unwrap());

        let ids: Vec<i64> = db.list_feeds().await.unwrap().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![second, third]);
        assert_eq!(
            db.get_feed(second).await.unwrap().unwrap().url,
            "https://feed2.example.com/rss"
        );
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let db = test_db().await;
        let first = db.insert_feed(&test_draft(1)).await.unwrap();
        let second = db.insert_feed(&test_draft(2)).await.unwrap();
        db.delete_feed(second).await.unwrap();

        let third = db.insert_feed(&test_draft(3)).await.unwrap();
        assert!(third > second);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_weekly_schedule_reads_back() {
        let db = test_db().await;
        let schedule = Schedule::parse_weekly("mon=07:00,19:00;fri=08:30").unwrap();
        let id = db
            .insert_feed(&test_draft(1).with_schedule(schedule.clone()))
            .await
            .unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.schedule, schedule);
        assert_eq!(db.list_feeds().await.unwrap()[0].schedule, schedule);
    }

    #[tokio::test]
    async fn test_unreadable_schedule_fails_rebuild() {
        let db = test_db().await;
        let broken = db.insert_feed(&test_draft(1)).await.unwrap();
        let fine = db.insert_feed(&test_draft(2)).await.unwrap();
        sqlx::query("UPDATE feeds SET schedule = ? WHERE id = ?")
            .bind(r#"{"type":"weekly","days":{"1":{"enabled":true}}}"#)
            .bind(broken)
            .execute(&db.pool)
            .await
            .unwrap();

        let feeds = db.list_feeds().await.unwrap();
        assert!(matches!(feeds[0].schedule, Schedule::Unreadable(_)));

        let registry = TriggerRegistry::new(Arc::new(db.clone()), chrono_tz::UTC);
        let report = registry.rebuild_all(&feeds, Utc::now()).await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken);
        assert!(matches!(report.failed[0].1, ScheduleError::Unreadable(_)));

        let triggers = db.scheduled(IMPORT_HOOK).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].args.feed_id(), fine);
    }
}
