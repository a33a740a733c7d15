use async_trait::async_trait;
use std::time::Duration;

use super::schema::Database;
use super::types::{MediaAsset, MediaError, StoreError};
use crate::feed::download;
use crate::traits::MediaStore;

impl Database {
    // ========================================================================
    // Media Assets
    // ========================================================================

    pub async fn insert_media(
        &self,
        owner_content_id: i64,
        alt_text: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO media_assets (owner_content_id, alt_text, content_type, bytes, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(owner_content_id)
        .bind(alt_text)
        .bind(content_type)
        .bind(bytes)
        .bind(bytes.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get_media_asset(&self, id: i64) -> Result<Option<MediaAsset>, StoreError> {
        let asset = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT id, owner_content_id, source_url, alt_text, content_type, size_bytes, created_at
            FROM media_assets
            WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(asset)
    }

    pub async fn find_media_by_source_url(&self, url: &str) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM media_assets WHERE source_url = ? ORDER BY id LIMIT 1")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }

    pub async fn set_media_source_url(&self, media_id: i64, url: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE media_assets SET source_url = ? WHERE id = ?")
            .bind(url)
            .bind(media_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn count_media_assets(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media_assets")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// ============================================================================
// Media Library
// ============================================================================

/// Sideloads remote images into the `media_assets` table.
#[derive(Clone)]
pub struct MediaLibrary {
    db: Database,
    client: reqwest::Client,
    max_bytes: usize,
    timeout: Duration,
}

impl MediaLibrary {
    pub fn new(db: Database, client: reqwest::Client, max_bytes: usize, timeout: Duration) -> Self {
        Self {
            db,
            client,
            max_bytes,
            timeout,
        }
    }
}

#[async_trait]
impl MediaStore for MediaLibrary {
    async fn find_by_source_url(&self, url: &str) -> Result<Option<i64>, StoreError> {
        self.db.find_media_by_source_url(url).await
    }

    async fn fetch_and_store(
        &self,
        url: &str,
        owner_content_id: i64,
        alt_text: &str,
    ) -> Result<i64, MediaError> {
        let body = download(&self.client, url, self.max_bytes, self.timeout).await?;

        // Only image responses become thumbnails
        let content_type = body
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if !content_type.starts_with("image/") {
            return Err(MediaError::NotAnImage(content_type));
        }

        let id = self
            .db
            .insert_media(owner_content_id, alt_text, &content_type, &body.bytes)
            .await?;
        tracing::debug!(
            media_id = id,
            url = %url,
            size = body.bytes.len(),
            "Stored remote image"
        );
        Ok(id)
    }

    async fn record_source_url(&self, media_id: i64, url: &str) -> Result<(), StoreError> {
        self.db.set_media_source_url(media_id, url).await
    }
}
