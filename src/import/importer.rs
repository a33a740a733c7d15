use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use crate::storage::{EpisodeRecord, FeedConfig, MediaError, NewContentItem, StoreError};
use crate::traits::{ContentStore, MediaStore};

/// Stored attribute holding an item's dedupe key.
pub const GUID_ATTRIBUTE: &str = "import_guid";
/// Stored attribute holding an item's audio enclosure URL.
pub const ENCLOSURE_ATTRIBUTE: &str = "import_enclosure";

const PUBLISHED_STATUS: &str = "publish";

/// Counts from one pass over a fetched feed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    /// Already imported earlier (dedupe key present)
    pub skipped: usize,
    /// Thumbnails attached, reused or freshly downloaded
    pub thumbnails: usize,
    pub media_failures: usize,
}

/// Writes fetched episodes into the content store.
#[derive(Clone)]
pub struct ItemImporter {
    content: Arc<dyn ContentStore>,
    media: Arc<dyn MediaStore>,
    timezone: Tz,
}

impl ItemImporter {
    pub fn new(content: Arc<dyn ContentStore>, media: Arc<dyn MediaStore>, timezone: Tz) -> Self {
        Self {
            content,
            media,
            timezone,
        }
    }

    /// Import every record not seen before, in order.
    ///
    /// Existing items are never touched. Media failures only cost the
    /// thumbnail.
    ///
    /// # Errors
    ///
    /// Content store failures end the pass; items created before the
    /// failure stay.
    pub async fn import(
        &self,
        feed: &FeedConfig,
        records: &[EpisodeRecord],
        now: DateTime<Utc>,
    ) -> Result<ImportStats, StoreError> {
        let mut stats = ImportStats::default();

        for record in records {
            if let Some(existing) = self
                .content
                .find_by_attribute(GUID_ATTRIBUTE, &record.guid)
                .await?
            {
                tracing::trace!(feed_id = feed.id, guid = %record.guid, content_id = existing, "Already imported");
                stats.skipped += 1;
                continue;
            }

            let content_id = self.content.insert(&self.build_item(feed, record, now)).await?;
            self.content
                .set_attribute(content_id, GUID_ATTRIBUTE, &record.guid)
                .await?;
            if let Some(enclosure) = &record.enclosure_url {
                self.content
                    .set_attribute(content_id, ENCLOSURE_ATTRIBUTE, enclosure)
                    .await?;
            }
            stats.imported += 1;

            if let Some(image_url) = &record.image_url {
                match self.attach_thumbnail(content_id, image_url, &record.title).await {
                    Ok(()) => stats.thumbnails += 1,
                    Err(e) => {
                        tracing::warn!(
                            feed_id = feed.id,
                            content_id = content_id,
                            url = %image_url,
                            error = %e,
                            "Could not attach thumbnail, keeping item without one"
                        );
                        stats.media_failures += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    fn build_item(&self, feed: &FeedConfig, record: &EpisodeRecord, now: DateTime<Utc>) -> NewContentItem {
        let published = record.published.unwrap_or(now);
        let player = record
            .enclosure_url
            .as_deref()
            .map(player_markup)
            .unwrap_or_default();

        NewContentItem {
            title: record.title.clone(),
            body: format!("{}\n\n{}", player, record.body_html),
            status: PUBLISHED_STATUS.to_string(),
            published_at: published.with_timezone(&self.timezone).naive_local(),
            published_at_gmt: published.naive_utc(),
            category_id: feed.category_id,
            tags: feed.tags.clone(),
        }
    }

    /// Reuse an asset already sideloaded from `image_url`, or download it.
    async fn attach_thumbnail(
        &self,
        content_id: i64,
        image_url: &str,
        title: &str,
    ) -> Result<(), MediaError> {
        if let Some(media_id) = self.media.find_by_source_url(image_url).await? {
            self.content.set_thumbnail(content_id, media_id).await?;
            return Ok(());
        }

        let media_id = self.media.fetch_and_store(image_url, content_id, title).await?;
        self.content.set_thumbnail(content_id, media_id).await?;
        self.media.record_source_url(media_id, image_url).await?;
        Ok(())
    }
}

/// Audio player for an enclosure. Only http(s) URLs are embedded.
pub fn player_markup(enclosure_url: &str) -> String {
    match url::Url::parse(enclosure_url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => format!(
            r#"<audio controls preload="metadata" src="{}"></audio>"#,
            quick_xml::escape::escape(parsed.as_str())
        ),
        _ => {
            tracing::debug!(url = %enclosure_url, "Not embedding player for non-http enclosure");
            String::new()
        }
    }
}
