use async_trait::async_trait;

use super::schema::Database;
use super::types::{ContentDbRow, ContentItem, NewContentItem, StoreError, TIMESTAMP_FORMAT};
use crate::traits::ContentStore;

/// Standard SELECT columns for content queries
const CONTENT_COLUMNS: &str = "id, title, body, status, published_at, published_at_gmt, \
                               category_id, tags, thumbnail_id, created_at";

#[async_trait]
impl ContentStore for Database {
    async fn insert(&self, item: &NewContentItem) -> Result<i64, StoreError> {
        let tags = serde_json::to_string(&item.tags)?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO content_items
                (title, body, status, published_at, published_at_gmt, category_id, tags, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.status)
        .bind(item.published_at.format(TIMESTAMP_FORMAT).to_string())
        .bind(item.published_at_gmt.format(TIMESTAMP_FORMAT).to_string())
        .bind(item.category_id)
        .bind(&tags)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_by_attribute(&self, key: &str, value: &str) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT content_id FROM content_meta WHERE meta_key = ? AND meta_value = ? ORDER BY content_id LIMIT 1",
        )
        .bind(key)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn set_attribute(&self, content_id: i64, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO content_meta (content_id, meta_key, meta_value)
            VALUES (?, ?, ?)
            ON CONFLICT(content_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value
        "#,
        )
        .bind(content_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_thumbnail(&self, content_id: i64, media_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE content_items SET thumbnail_id = ? WHERE id = ?")
            .bind(media_id)
            .bind(content_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

impl Database {
    // ========================================================================
    // Content Queries
    // ========================================================================

    pub async fn get_content_item(&self, id: i64) -> Result<Option<ContentItem>, StoreError> {
        let query = format!("SELECT {} FROM content_items WHERE id = ?", CONTENT_COLUMNS);
        let row: Option<ContentDbRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ContentDbRow::into_item))
    }

    /// Content items, newest first.
    pub async fn list_content_items(&self, limit: i64) -> Result<Vec<ContentItem>, StoreError> {
        let query = format!(
            "SELECT {} FROM content_items ORDER BY published_at_gmt DESC, id DESC LIMIT ?",
            CONTENT_COLUMNS
        );
        let rows: Vec<ContentDbRow> = sqlx::query_as(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ContentDbRow::into_item).collect())
    }

    pub async fn get_attribute(&self, content_id: i64, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT meta_value FROM content_meta WHERE content_id = ? AND meta_key = ?",
        )
        .bind(content_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(v,)| v))
    }

    pub async fn count_content_items(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM content_items")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
