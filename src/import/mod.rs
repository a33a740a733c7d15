//! Import passes over one feed.
//!
//! [`Orchestrator`] is the entry point for both fired triggers and manual
//! requests. It holds an [`ImportLock`] for the argument tuple, fetches the
//! feed and hands the records to the [`ItemImporter`].

mod importer;
mod lock;
mod orchestrator;

pub use importer::{player_markup, ImportStats, ItemImporter, ENCLOSURE_ATTRIBUTE, GUID_ATTRIBUTE};
pub use lock::{ImportLock, DEFAULT_LOCK_TTL_MINUTES};
pub use orchestrator::{ImportError, ImportOutcome, Orchestrator};
