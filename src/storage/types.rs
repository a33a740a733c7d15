use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::feed::FetchError;
use crate::schedule::{Recurrence, Schedule, TriggerArgs};

/// Storage format for content timestamps (`2024-01-02 07:00:00`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while opening the database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another process. Close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

/// Failure of a store operation. Surfaced to callers as a failed pass; never retried here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored value could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    Invalid(String),
}

/// Non-fatal failure to sideload a remote image.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to download media: {0}")]
    Download(#[from] FetchError),

    #[error("Remote file is not an image (content type {0:?})")]
    NotAnImage(String),

    #[error("Failed to store media: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// Feed Configuration
// ============================================================================

/// A configured podcast feed.
///
/// `id` is assigned once at creation and never reused or renumbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub id: i64,
    pub url: String,
    pub category_id: Option<i64>,
    pub tags: Vec<String>,
    pub schedule: Schedule,
}

/// Feed fields as submitted for create or edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDraft {
    pub url: String,
    pub category_id: Option<i64>,
    pub tags: Vec<String>,
    pub schedule: Schedule,
}

impl FeedDraft {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category_id: Option<i64>) -> Self {
        self.category_id = category_id;
        self
    }

    /// Tags from free text, comma separated.
    pub fn with_tags_text(mut self, text: &str) -> Self {
        self.tags = parse_tags(text);
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }
}

impl From<FeedConfig> for FeedDraft {
    fn from(feed: FeedConfig) -> Self {
        Self {
            url: feed.url,
            category_id: feed.category_id,
            tags: feed.tags,
            schedule: feed.schedule,
        }
    }
}

/// Split comma-separated tag text, trimming and dropping empty entries.
pub fn parse_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Row type for feed queries
pub(crate) type FeedRow = (i64, String, Option<i64>, String, String);

pub(crate) fn feed_from_row((id, url, category_id, tags, schedule): FeedRow) -> FeedConfig {
    let tags = serde_json::from_str(&tags).unwrap_or_else(|e| {
        tracing::warn!(feed_id = id, error = %e, "Unreadable stored tags, treating as empty");
        Vec::new()
    });
    let schedule = serde_json::from_str(&schedule).unwrap_or_else(|e| {
        tracing::warn!(feed_id = id, error = %e, "Unreadable stored schedule");
        Schedule::Unreadable(e.to_string())
    });
    FeedConfig {
        id,
        url,
        category_id,
        tags,
        schedule,
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// A trigger registered with the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTrigger {
    pub hook: String,
    pub args: TriggerArgs,
    pub recurrence: Recurrence,
    pub next_fire_at: DateTime<Utc>,
}

/// Row type for trigger queries: (hook, args json, recurrence, next_fire_at)
pub(crate) type TriggerRow = (String, String, String, i64);

pub(crate) fn trigger_from_row(
    (hook, args, recurrence, next_fire_at): TriggerRow,
) -> Result<ScheduledTrigger, StoreError> {
    let args: TriggerArgs = serde_json::from_str(&args)?;
    let recurrence: Recurrence = recurrence
        .parse()
        .map_err(|_| StoreError::Invalid(format!("recurrence {recurrence:?}")))?;
    let next_fire_at = DateTime::from_timestamp(next_fire_at, 0)
        .ok_or_else(|| StoreError::Invalid(format!("timestamp {next_fire_at}")))?;
    Ok(ScheduledTrigger {
        hook,
        args,
        recurrence,
        next_fire_at,
    })
}

// ============================================================================
// Episodes and Content
// ============================================================================

/// A normalized feed item ready for import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRecord {
    /// Feed-provided id, or a hash of title and publish timestamp
    pub guid: String,
    pub title: String,
    pub body_html: String,
    pub published: Option<DateTime<Utc>>,
    pub enclosure_url: Option<String>,
    /// Item iTunes image, then media thumbnail, then channel image
    pub image_url: Option<String>,
}

/// Content item to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContentItem {
    pub title: String,
    pub body: String,
    pub status: String,
    /// Site-local publish time
    pub published_at: NaiveDateTime,
    pub published_at_gmt: NaiveDateTime,
    pub category_id: Option<i64>,
    pub tags: Vec<String>,
}

/// Content item as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub status: String,
    pub published_at: String,
    pub published_at_gmt: String,
    pub category_id: Option<i64>,
    pub tags: Vec<String>,
    pub thumbnail_id: Option<i64>,
    pub created_at: i64,
}

/// Internal row type for content queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContentDbRow {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub status: String,
    pub published_at: String,
    pub published_at_gmt: String,
    pub category_id: Option<i64>,
    pub tags: String,
    pub thumbnail_id: Option<i64>,
    pub created_at: i64,
}

impl ContentDbRow {
    pub(crate) fn into_item(self) -> ContentItem {
        ContentItem {
            id: self.id,
            title: self.title,
            body: self.body,
            status: self.status,
            published_at: self.published_at,
            published_at_gmt: self.published_at_gmt,
            category_id: self.category_id,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            thumbnail_id: self.thumbnail_id,
            created_at: self.created_at,
        }
    }
}

/// Stored media asset metadata (bytes are loaded separately).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MediaAsset {
    pub id: i64,
    pub owner_content_id: Option<i64>,
    pub source_url: Option<String>,
    pub alt_text: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: i64,
}
