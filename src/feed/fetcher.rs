use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use super::http::{download, FetchError};
use super::parser::{FeedParser, ParsedFeed, RawItem};
use crate::storage::EpisodeRecord;

/// Downloads a feed and turns it into normalized episode records.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    parser: Arc<dyn FeedParser>,
    max_items: usize,
    max_bytes: usize,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(
        client: reqwest::Client,
        parser: Arc<dyn FeedParser>,
        max_items: usize,
        max_bytes: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            parser,
            max_items,
            max_bytes,
            timeout,
        }
    }

    /// Fetch `url` and return at most `max_items` records in feed order.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] / [`FetchError::Timeout`] - transport failures
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::ResponseTooLarge`] - body over the configured cap
    /// - [`FetchError::Parse`] - not RSS or Atom
    pub async fn fetch(&self, url: &str) -> Result<Vec<EpisodeRecord>, FetchError> {
        let body = download(&self.client, url, self.max_bytes, self.timeout).await?;
        let feed = self.parser.parse(&body.bytes)?;
        let total = feed.items.len();
        let records = normalize(feed, self.max_items);

        tracing::debug!(
            url = %url,
            items = total,
            kept = records.len(),
            "Fetched feed"
        );
        Ok(records)
    }
}

/// Cap to `max_items` and resolve guids and images.
pub(crate) fn normalize(feed: ParsedFeed, max_items: usize) -> Vec<EpisodeRecord> {
    let ParsedFeed {
        channel_image,
        items,
    } = feed;

    items
        .into_iter()
        .take(max_items)
        .map(|item| episode_record(item, channel_image.as_deref()))
        .collect()
}

fn episode_record(item: RawItem, channel_image: Option<&str>) -> EpisodeRecord {
    let guid = item
        .guid
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback_guid(&item.title, item.published.map(|p| p.timestamp())));

    let body_html = item
        .content
        .filter(|c| !c.trim().is_empty())
        .or(item.description)
        .unwrap_or_default();

    // Item iTunes image, then media thumbnail, then channel image
    let image_url = item
        .itunes_image
        .or(item.media_thumbnail)
        .or_else(|| channel_image.map(str::to_string));

    EpisodeRecord {
        guid,
        title: item.title,
        body_html,
        published: item.published,
        enclosure_url: item.enclosure_url.filter(|u| !u.trim().is_empty()),
        image_url,
    }
}

/// Stable id for items published without one: hash of title and publish time.
pub fn fallback_guid(title: &str, published: Option<i64>) -> String {
    let input = format!(
        "{}{}",
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
