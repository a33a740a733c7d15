use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use super::importer::{ImportStats, ItemImporter};
use super::lock::ImportLock;
use crate::feed::{FeedFetcher, FetchError};
use crate::schedule::TriggerArgs;
use crate::storage::StoreError;
use crate::traits::FeedStore;

/// Failures surfaced to whoever invoked the pass.
///
/// Everything else (missing feed, fetch failure, media trouble, lock
/// contention) is logged and reported as an [`ImportOutcome`].
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Import pass failed: {0}")]
    Store(#[from] StoreError),
}

/// How an import pass ended.
#[derive(Debug)]
pub enum ImportOutcome {
    Completed(ImportStats),
    /// Another pass with the same argument tuple, or another pass over the
    /// same feed, holds the lock
    Locked,
    /// The trigger references a feed that no longer exists
    FeedMissing,
    /// The feed has no URL configured
    MissingUrl,
    FetchFailed(FetchError),
}

impl ImportOutcome {
    pub fn stats(&self) -> Option<ImportStats> {
        match self {
            ImportOutcome::Completed(stats) => Some(*stats),
            _ => None,
        }
    }
}

/// Runs import passes: lock, look up the feed, fetch, import, unlock.
#[derive(Clone)]
pub struct Orchestrator {
    feeds: Arc<dyn FeedStore>,
    fetcher: FeedFetcher,
    importer: ItemImporter,
    lock: ImportLock,
}

impl Orchestrator {
    pub fn new(
        feeds: Arc<dyn FeedStore>,
        fetcher: FeedFetcher,
        importer: ItemImporter,
        lock: ImportLock,
    ) -> Self {
        Self {
            feeds,
            fetcher,
            importer,
            lock,
        }
    }

    /// Handle a fired trigger. Skips immediately if the same argument tuple,
    /// or any other pass over the same feed, is already running.
    pub async fn run_triggered(&self, args: &TriggerArgs) -> Result<ImportOutcome, ImportError> {
        let feed_id = args.feed_id();
        if !self.lock.try_acquire(args).await? {
            tracing::info!(feed_id = feed_id, args = %args, "Import already running, skipping");
            return Ok(ImportOutcome::Locked);
        }

        let feed_locked = match self.lock.try_acquire_feed(feed_id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.release_args(args).await;
                return Err(e.into());
            }
        };
        if !feed_locked {
            tracing::info!(
                feed_id = feed_id,
                args = %args,
                "Another import of this feed is running, skipping"
            );
            self.release_args(args).await;
            return Ok(ImportOutcome::Locked);
        }

        let result = self.run_pass(feed_id).await;

        if let Err(e) = self.lock.release_feed(feed_id).await {
            tracing::warn!(
                feed_id = feed_id,
                error = %e,
                "Failed to release feed lock, it will expire on its own"
            );
        }
        self.release_args(args).await;

        if let Err(e) = &result {
            tracing::error!(feed_id = args.feed_id(), error = %e, "Import pass failed");
        }
        result
    }

    /// On-demand import under a `manual` tuple. Shares the per-feed lock
    /// with scheduled passes.
    pub async fn run_manual(&self, feed_id: i64) -> Result<ImportOutcome, ImportError> {
        self.run_triggered(&TriggerArgs::Manual { feed_id }).await
    }

    async fn release_args(&self, args: &TriggerArgs) {
        if let Err(e) = self.lock.release(args).await {
            tracing::warn!(
                feed_id = args.feed_id(),
                args = %args,
                error = %e,
                "Failed to release import lock, it will expire on its own"
            );
        }
    }

    async fn run_pass(&self, feed_id: i64) -> Result<ImportOutcome, ImportError> {
        let Some(feed) = self.feeds.get_feed(feed_id).await? else {
            tracing::warn!(feed_id = feed_id, "Trigger fired for unknown feed, ignoring");
            return Ok(ImportOutcome::FeedMissing);
        };

        if feed.url.trim().is_empty() {
            tracing::error!(feed_id = feed_id, "Feed has no URL, skipping import");
            return Ok(ImportOutcome::MissingUrl);
        }

        let records = match self.fetcher.fetch(&feed.url).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(feed_id = feed_id, url = %feed.url, error = %e, "Feed fetch failed");
                return Ok(ImportOutcome::FetchFailed(e));
            }
        };

        let stats = self.importer.import(&feed, &records, Utc::now()).await?;
        tracing::info!(
            feed_id = feed_id,
            url = %feed.url,
            fetched = records.len(),
            imported = stats.imported,
            skipped = stats.skipped,
            media_failures = stats.media_failures,
            "Import pass complete"
        );
        Ok(ImportOutcome::Completed(stats))
    }
}
