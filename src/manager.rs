//! Feed administration: create, edit and delete feeds, keeping the trigger
//! registry in step with every change.
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;
use crate::schedule::{RebuildReport, TriggerRegistry};
use crate::storage::{FeedConfig, FeedDraft, StoreError};
use crate::traits::FeedStore;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No feed with id {0}")]
    NotFound(i64),
}

/// Result of a save: the feed's id and how the rebuild went.
#[derive(Debug)]
pub struct Saved {
    pub id: i64,
    pub report: RebuildReport,
}

#[derive(Clone)]
pub struct FeedManager {
    store: Arc<dyn FeedStore>,
    registry: TriggerRegistry,
}

impl FeedManager {
    pub fn new(store: Arc<dyn FeedStore>, registry: TriggerRegistry) -> Self {
        Self { store, registry }
    }

    pub async fn list(&self) -> Result<Vec<FeedConfig>, ManagerError> {
        Ok(self.store.list_feeds().await?)
    }

    pub async fn get(&self, id: i64) -> Result<FeedConfig, ManagerError> {
        self.store
            .get_feed(id)
            .await?
            .ok_or(ManagerError::NotFound(id))
    }

    /// Create (`id = None`) or replace a feed, then rebuild all triggers.
    ///
    /// The URL must be http(s); tags and schedule are normalized. Schedule
    /// values are not rejected here: a bad interval or time only keeps this
    /// feed unscheduled and shows up in the returned report.
    pub async fn save(&self, id: Option<i64>, draft: FeedDraft) -> Result<Saved, ManagerError> {
        let draft = normalize_draft(draft)?;

        let id = match id {
            Some(id) => {
                if !self.store.update_feed(id, &draft).await? {
                    return Err(ManagerError::NotFound(id));
                }
                tracing::info!(feed_id = id, url = %draft.url, "Feed updated");
                id
            }
            None => {
                let id = self.store.insert_feed(&draft).await?;
                tracing::info!(feed_id = id, url = %draft.url, "Feed added");
                id
            }
        };

        let report = self.reschedule().await?;
        Ok(Saved { id, report })
    }

    /// Delete a feed and rebuild. Other feeds keep their ids.
    pub async fn delete(&self, id: i64) -> Result<RebuildReport, ManagerError> {
        if !self.store.delete_feed(id).await? {
            return Err(ManagerError::NotFound(id));
        }
        tracing::info!(feed_id = id, "Feed deleted");
        self.reschedule().await
    }

    /// Rebuild every trigger from the stored feed list.
    pub async fn reschedule(&self) -> Result<RebuildReport, ManagerError> {
        let feeds = self.store.list_feeds().await?;
        Ok(self.registry.rebuild_all(&feeds, Utc::now()).await?)
    }
}

fn normalize_draft(draft: FeedDraft) -> Result<FeedDraft, ConfigError> {
    let url = draft.url.trim();
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => return Err(ConfigError::InvalidUrl(url.to_string())),
    }

    let tags = draft
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    Ok(FeedDraft {
        url: url.to_string(),
        category_id: draft.category_id,
        tags,
        schedule: draft.schedule.normalized(),
    })
}
