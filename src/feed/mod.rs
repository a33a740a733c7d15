//! Podcast feed retrieval.
//!
//! - [`http`] - size-capped, single-attempt downloads shared with media sideloading
//! - [`parser`] - RSS/Atom parsing using `feed-rs`, plus a `quick-xml` pass for
//!   raw guids and the iTunes / Media RSS image extensions
//! - [`fetcher`] - download + parse + normalize into [`EpisodeRecord`](crate::storage::EpisodeRecord)s

mod fetcher;
mod http;
mod parser;

pub use fetcher::{fallback_guid, FeedFetcher};
pub use http::{build_client, download, Download, FetchError};
pub use parser::{FeedParser, ParseError, ParsedFeed, RawItem, XmlFeedParser};
