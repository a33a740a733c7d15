//! Seams to the collaborators the import engine drives.
//!
//! The SQLite [`Database`](crate::storage::Database) implements the feed,
//! trigger and content stores; [`MediaLibrary`](crate::storage::MediaLibrary)
//! implements the media store. Tests and embedding hosts can swap any of them.
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::schedule::{Recurrence, TriggerArgs};
use crate::storage::{FeedConfig, FeedDraft, MediaError, NewContentItem, ScheduledTrigger, StoreError};

/// Persistent feed configuration.
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn list_feeds(&self) -> Result<Vec<FeedConfig>, StoreError>;

    async fn get_feed(&self, id: i64) -> Result<Option<FeedConfig>, StoreError>;

    /// Insert a new feed, returning its id. Ids are never reused.
    async fn insert_feed(&self, draft: &FeedDraft) -> Result<i64, StoreError>;

    /// Replace an existing feed in place. Returns `false` if the id is unknown.
    async fn update_feed(&self, id: i64, draft: &FeedDraft) -> Result<bool, StoreError>;

    /// Returns `false` if the id is unknown.
    async fn delete_feed(&self, id: i64) -> Result<bool, StoreError>;
}

/// The host's job-trigger mechanism.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Remove every trigger registered under `hook`.
    async fn clear_all(&self, hook: &str) -> Result<u64, StoreError>;

    async fn schedule_recurring(
        &self,
        hook: &str,
        first_fire: DateTime<Utc>,
        recurrence: Recurrence,
        args: &TriggerArgs,
    ) -> Result<(), StoreError>;

    async fn is_scheduled(&self, hook: &str, args: &TriggerArgs) -> Result<bool, StoreError>;

    /// All triggers under `hook`, soonest first.
    async fn scheduled(&self, hook: &str) -> Result<Vec<ScheduledTrigger>, StoreError>;
}

/// Where imported episodes end up.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert(&self, item: &NewContentItem) -> Result<i64, StoreError>;

    /// Id of some content item carrying the stored attribute `key = value`.
    async fn find_by_attribute(&self, key: &str, value: &str) -> Result<Option<i64>, StoreError>;

    async fn set_attribute(&self, content_id: i64, key: &str, value: &str) -> Result<(), StoreError>;

    async fn set_thumbnail(&self, content_id: i64, media_id: i64) -> Result<(), StoreError>;
}

/// Blob/media storage with sideloading of remote images.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn find_by_source_url(&self, url: &str) -> Result<Option<i64>, StoreError>;

    /// Download `url` and store it as a media asset owned by `owner_content_id`.
    async fn fetch_and_store(
        &self,
        url: &str,
        owner_content_id: i64,
        alt_text: &str,
    ) -> Result<i64, MediaError>;

    /// Remember which remote URL a media asset came from, for later reuse.
    async fn record_source_url(&self, media_id: i64, url: &str) -> Result<(), StoreError>;
}
