use chrono::{TimeDelta, Utc};
use sha2::{Digest, Sha256};

use crate::schedule::TriggerArgs;
use crate::storage::{Database, StoreError};

/// Default lifetime of an import lock.
pub const DEFAULT_LOCK_TTL_MINUTES: i64 = 15;

/// Per-argument-tuple mutual exclusion for import passes.
///
/// Backed by the `import_locks` table so it also holds across processes
/// sharing one database. The TTL only bounds how long a crashed pass keeps
/// others out; it never interrupts a running pass.
#[derive(Clone)]
pub struct ImportLock {
    db: Database,
    ttl: TimeDelta,
}

impl ImportLock {
    pub fn new(db: Database, ttl: TimeDelta) -> Self {
        Self { db, ttl }
    }

    /// Stable key for an argument tuple: hex SHA-256 of its JSON form.
    pub fn key(args: &TriggerArgs) -> Result<String, StoreError> {
        let json = serde_json::to_string(args)?;
        Ok(format!("import_lock_{:x}", Sha256::digest(json.as_bytes())))
    }

    /// Key shared by every pass over one feed, scheduled or manual.
    pub fn feed_key(feed_id: i64) -> String {
        format!("import_lock_feed_{}", feed_id)
    }

    /// Take the lock unless a live holder exists. Never waits.
    pub async fn try_acquire(&self, args: &TriggerArgs) -> Result<bool, StoreError> {
        self.try_acquire_key(&Self::key(args)?).await
    }

    /// Drop the lock. Releasing a lock that is not held is fine.
    pub async fn release(&self, args: &TriggerArgs) -> Result<(), StoreError> {
        self.release_key(&Self::key(args)?).await
    }

    /// Take the per-feed lock that serializes all passes over `feed_id`.
    pub async fn try_acquire_feed(&self, feed_id: i64) -> Result<bool, StoreError> {
        self.try_acquire_key(&Self::feed_key(feed_id)).await
    }

    pub async fn release_feed(&self, feed_id: i64) -> Result<(), StoreError> {
        self.release_key(&Self::feed_key(feed_id)).await
    }

    async fn try_acquire_key(&self, key: &str) -> Result<bool, StoreError> {
        self.db.try_insert_lock(key, Utc::now(), self.ttl).await
    }

    async fn release_key(&self, key: &str) -> Result<(), StoreError> {
        self.db.delete_lock(key).await
    }
}
