use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use super::calculator::plan_triggers;
use super::types::{ScheduleError, IMPORT_HOOK};
use crate::storage::{FeedConfig, StoreError};
use crate::traits::JobScheduler;

/// Outcome of a full trigger rebuild.
#[derive(Debug, Default)]
pub struct RebuildReport {
    /// Triggers registered with the scheduler
    pub scheduled: usize,
    /// Planned triggers whose argument tuple was already registered
    pub duplicates: usize,
    /// Feeds whose schedule could not be planned, with the reason
    pub failed: Vec<(i64, ScheduleError)>,
}

/// Owns every trigger registered under [`IMPORT_HOOK`].
///
/// Reconciliation is declarative: each rebuild tears down the whole hook
/// and registers what the current feed list asks for.
#[derive(Clone)]
pub struct TriggerRegistry {
    scheduler: Arc<dyn JobScheduler>,
    timezone: Tz,
}

impl TriggerRegistry {
    pub fn new(scheduler: Arc<dyn JobScheduler>, timezone: Tz) -> Self {
        Self {
            scheduler,
            timezone,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Clear the hook and register triggers for every feed.
    ///
    /// A feed with an invalid schedule is logged and skipped; the others are
    /// still registered.
    ///
    /// # Errors
    ///
    /// Scheduler storage failures abort the rebuild.
    pub async fn rebuild_all(
        &self,
        feeds: &[FeedConfig],
        now: DateTime<Utc>,
    ) -> Result<RebuildReport, StoreError> {
        let cleared = self.scheduler.clear_all(IMPORT_HOOK).await?;
        tracing::debug!(cleared = cleared, feeds = feeds.len(), "Rebuilding import triggers");

        let mut report = RebuildReport::default();

        for feed in feeds {
            let planned = match plan_triggers(feed, now, self.timezone) {
                Ok(planned) => planned,
                Err(e) => {
                    tracing::error!(
                        feed_id = feed.id,
                        url = %feed.url,
                        schedule = feed.schedule.kind(),
                        error = %e,
                        "Invalid feed schedule, not scheduling this feed"
                    );
                    report.failed.push((feed.id, e));
                    continue;
                }
            };

            for trigger in planned {
                if self.scheduler.is_scheduled(IMPORT_HOOK, &trigger.args).await? {
                    report.duplicates += 1;
                    continue;
                }
                self.scheduler
                    .schedule_recurring(IMPORT_HOOK, trigger.first_fire, trigger.recurrence, &trigger.args)
                    .await?;
                tracing::debug!(
                    feed_id = feed.id,
                    args = %trigger.args,
                    recurrence = %trigger.recurrence,
                    first_fire = %trigger.first_fire,
                    "Scheduled import trigger"
                );
                report.scheduled += 1;
            }
        }

        tracing::info!(
            scheduled = report.scheduled,
            failed = report.failed.len(),
            "Import triggers rebuilt"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Recurrence, Schedule, TriggerArgs};
    use crate::storage::Database;
    use chrono::{NaiveDateTime, TimeZone};
    use pretty_assertions::assert_eq;

    fn feed(id: i64, schedule: Schedule) -> FeedConfig {
        FeedConfig {
            id,
            url: format!("https://feed{id}.example.com/rss"),
            category_id: None,
            tags: Vec::new(),
            schedule,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        Utc.from_utc_datetime(&naive)
    }

    async fn registry() -> (Database, TriggerRegistry) {
        let db = Database::open(":memory:").await.unwrap();
        let registry = TriggerRegistry::new(Arc::new(db.clone()), Tz::UTC);
        (db, registry)
    }

    #[tokio::test]
    async fn test_rebuild_registers_each_feed() {
        let (db, registry) = registry().await;
        let feeds = vec![
            feed(1, Schedule::Interval { interval: "hourly".into() }),
            feed(2, Schedule::Time { time: "07:00".into() }),
            feed(3, Schedule::None),
        ];

        let report = registry
            .rebuild_all(&feeds, at("2024-01-01 07:30:00"))
            .await
            .unwrap();
        assert_eq!(report.scheduled, 2);
        assert!(report.failed.is_empty());

        let triggers = db.scheduled(IMPORT_HOOK).await.unwrap();
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].args, TriggerArgs::Interval { feed_id: 1 });
        assert_eq!(triggers[0].recurrence, Recurrence::Hourly);
        assert_eq!(triggers[1].args, TriggerArgs::Daily { feed_id: 2 });
        assert_eq!(triggers[1].next_fire_at, at("2024-01-02 07:00:00"));
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_triggers() {
        let (db, registry) = registry().await;
        let now = at("2024-01-01 07:30:00");

        registry
            .rebuild_all(&[feed(1, Schedule::Interval { interval: "hourly".into() })], now)
            .await
            .unwrap();
        registry
            .rebuild_all(&[feed(1, Schedule::Time { time: "09:00".into() })], now)
            .await
            .unwrap();

        let triggers = db.scheduled(IMPORT_HOOK).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].args, TriggerArgs::Daily { feed_id: 1 });
        assert_eq!(triggers[0].next_fire_at, at("2024-01-01 09:00:00"));
    }

    #[tokio::test]
    async fn test_bad_feed_does_not_block_others() {
        let (db, registry) = registry().await;
        let feeds = vec![
            feed(1, Schedule::Interval { interval: "sometimes".into() }),
            feed(2, Schedule::Time { time: "not a time".into() }),
            feed(3, Schedule::Interval { interval: "daily".into() }),
        ];

        let report = registry.rebuild_all(&feeds, Utc::now()).await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].0, 1);
        assert_eq!(report.failed[1].0, 2);

        let triggers = db.scheduled(IMPORT_HOOK).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].args.feed_id(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_weekly_times_registered_once() {
        let (db, registry) = registry().await;
        let schedule = Schedule::parse_weekly("mon=07:00,7:00").unwrap();

        let report = registry
            .rebuild_all(&[feed(1, schedule)], Utc::now())
            .await
            .unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(db.scheduled(IMPORT_HOOK).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_with_no_feeds_clears_hook() {
        let (db, registry) = registry().await;
        registry
            .rebuild_all(&[feed(1, Schedule::Interval { interval: "hourly".into() })], Utc::now())
            .await
            .unwrap();
        registry.rebuild_all(&[], Utc::now()).await.unwrap();
        assert!(db.scheduled(IMPORT_HOOK).await.unwrap().is_empty());
    }
}
