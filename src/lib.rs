//! Scheduled podcast feed importer.
//!
//! Feeds are configured with an optional fetch schedule. The
//! [`schedule::TriggerRegistry`] turns the feed list into recurring triggers,
//! the [`host::TriggerHost`] fires them, and the [`import::Orchestrator`]
//! fetches each feed and materializes new episodes as content items.

pub mod app;
pub mod config;
pub mod feed;
pub mod host;
pub mod import;
pub mod manager;
pub mod schedule;
pub mod storage;
pub mod traits;
