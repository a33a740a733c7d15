use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::feed::{build_client, FeedFetcher, FetchError, XmlFeedParser};
use crate::host::TriggerHost;
use crate::import::{ImportLock, ItemImporter, Orchestrator};
use crate::manager::FeedManager;
use crate::schedule::TriggerRegistry;
use crate::storage::{Database, MediaLibrary};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] FetchError),
}

/// The importer wired together over one database.
///
/// The SQLite database backs the feed, trigger, content and media stores;
/// one HTTP client is shared by feed fetches and image sideloading.
#[derive(Clone)]
pub struct App {
    pub db: Database,
    pub config: Config,
    pub manager: FeedManager,
    pub orchestrator: Orchestrator,
}

impl App {
    pub fn new(db: Database, config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let timezone = config.tz()?;
        let client = build_client(&config.user_agent, config.fetch_timeout())?;

        let registry = TriggerRegistry::new(Arc::new(db.clone()), timezone);
        let manager = FeedManager::new(Arc::new(db.clone()), registry);

        let fetcher = FeedFetcher::new(
            client.clone(),
            Arc::new(XmlFeedParser),
            config.max_items_per_fetch,
            config.max_feed_bytes,
            config.fetch_timeout(),
        );
        let media = MediaLibrary::new(
            db.clone(),
            client,
            config.max_media_bytes,
            config.fetch_timeout(),
        );
        let importer = ItemImporter::new(Arc::new(db.clone()), Arc::new(media), timezone);
        let lock = ImportLock::new(db.clone(), config.lock_ttl());
        let orchestrator = Orchestrator::new(Arc::new(db.clone()), fetcher, importer, lock);

        Ok(Self {
            db,
            config,
            manager,
            orchestrator,
        })
    }

    pub fn host(&self) -> TriggerHost {
        TriggerHost::new(
            self.db.clone(),
            self.orchestrator.clone(),
            self.config.poll_interval(),
        )
    }
}
