mod content;
mod feeds;
mod locks;
mod media;
mod schema;
mod triggers;
mod types;

pub use media::MediaLibrary;
pub use schema::Database;
pub use types::{
    parse_tags, ContentItem, DatabaseError, EpisodeRecord, FeedConfig, FeedDraft, MediaAsset,
    MediaError, NewContentItem, ScheduledTrigger, StoreError, TIMESTAMP_FORMAT,
};
