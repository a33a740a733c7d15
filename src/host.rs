//! In-process trigger host: fires due triggers against the orchestrator.
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::import::{ImportOutcome, Orchestrator};
use crate::schedule::{TriggerArgs, IMPORT_HOOK};
use crate::storage::{Database, StoreError};

/// Summary of one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub fired: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Polls the trigger table and runs an import for every due trigger.
///
/// Due triggers are grouped by feed and each feed gets one pass per poll.
/// Different feeds run concurrently.
pub struct TriggerHost {
    db: Database,
    orchestrator: Orchestrator,
    poll_interval: Duration,
}

impl TriggerHost {
    pub fn new(db: Database, orchestrator: Orchestrator, poll_interval: Duration) -> Self {
        Self {
            db,
            orchestrator,
            poll_interval,
        }
    }

    /// Poll until `shutdown` resolves. A poll already running is finished first.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut timer = tokio::time::interval(self.poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            poll_secs = self.poll_interval.as_secs(),
            "Trigger host started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Trigger host stopping");
                    break;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.poll(Utc::now()).await {
                        tracing::error!(error = %e, "Failed to claim due triggers");
                    }
                }
            }
        }
    }

    /// Claim triggers due at `now` and run them.
    pub async fn poll(&self, now: DateTime<Utc>) -> Result<PollSummary, StoreError> {
        let due = self.db.claim_due(IMPORT_HOOK, now).await?;
        if due.is_empty() {
            return Ok(PollSummary::default());
        }

        // Several slots of one feed can come due together
        let mut by_feed: BTreeMap<i64, Vec<&TriggerArgs>> = BTreeMap::new();
        for trigger in &due {
            by_feed
                .entry(trigger.args.feed_id())
                .or_default()
                .push(&trigger.args);
        }
        tracing::debug!(count = due.len(), feeds = by_feed.len(), "Firing due triggers");

        let mut summary = PollSummary {
            fired: due.len(),
            ..PollSummary::default()
        };
        for (feed_id, args) in &by_feed {
            if args.len() > 1 {
                tracing::debug!(
                    feed_id = *feed_id,
                    coalesced = args.len() - 1,
                    "Coalescing due triggers into one pass"
                );
                summary.skipped += args.len() - 1;
            }
        }

        let results = join_all(
            by_feed
                .values()
                .map(|args| self.orchestrator.run_triggered(args[0])),
        )
        .await;

        for result in results {
            match result {
                Ok(ImportOutcome::Completed(_)) => summary.completed += 1,
                Ok(_) => summary.skipped += 1,
                // Already logged by the orchestrator
                Err(_) => summary.failed += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedFetcher, XmlFeedParser};
    use crate::import::{ImportLock, ItemImporter};
    use crate::manager::FeedManager;
    use crate::schedule::{Recurrence, Schedule, TriggerRegistry};
    use crate::storage::{FeedDraft, MediaLibrary};
    use crate::traits::{FeedStore, JobScheduler};
    use chrono::TimeDelta;
    use chrono_tz::Tz;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Show</title>
    <item><guid>ep-1</guid><title>One</title></item>
</channel></rss>"#;

    fn host(db: &Database) -> TriggerHost {
        let client = reqwest::Client::new();
        let timeout = Duration::from_secs(5);
        let orchestrator = Orchestrator::new(
            Arc::new(db.clone()),
            FeedFetcher::new(client.clone(), Arc::new(XmlFeedParser), 10, 1 << 20, timeout),
            ItemImporter::new(
                Arc::new(db.clone()),
                Arc::new(MediaLibrary::new(db.clone(), client, 1 << 20, timeout)),
                Tz::UTC,
            ),
            ImportLock::new(db.clone(), TimeDelta::minutes(15)),
        );
        TriggerHost::new(db.clone(), orchestrator, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_poll_fires_due_interval_trigger_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let manager = FeedManager::new(
            Arc::new(db.clone()),
            TriggerRegistry::new(Arc::new(db.clone()), Tz::UTC),
        );
        manager
            .save(
                None,
                FeedDraft::new(mock_server.uri()).with_schedule(Schedule::Interval {
                    interval: "hourly".into(),
                }),
            )
            .await
            .unwrap();

        let host = host(&db);
        let now = Utc::now() + TimeDelta::seconds(1);
        let summary = host.poll(now).await.unwrap();
        assert_eq!(
            summary,
            PollSummary {
                fired: 1,
                completed: 1,
                skipped: 0,
                failed: 0
            }
        );
        assert_eq!(db.count_content_items().await.unwrap(), 1);

        // Not due again until the next hour
        assert_eq!(host.poll(now).await.unwrap(), PollSummary::default());
        let next = db.scheduled(IMPORT_HOOK).await.unwrap()[0].next_fire_at;
        assert!(next > now);
    }

    #[tokio::test]
    async fn test_same_feed_slots_due_together_import_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Show</title>
    <item><guid>ep-1</guid><title>One</title></item>
    <item><guid>ep-2</guid><title>Two</title></item>
    <item><guid>ep-3</guid><title>Three</title></item>
</channel></rss>"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db
            .insert_feed(&FeedDraft::new(mock_server.uri()))
            .await
            .unwrap();
        let due_at = Utc::now() - TimeDelta::minutes(1);
        for time in ["07:00", "19:00"] {
            let args = TriggerArgs::Weekly {
                feed_id,
                day: 1,
                time: time.into(),
            };
            db.schedule_recurring(IMPORT_HOOK, due_at, Recurrence::Weekly, &args)
                .await
                .unwrap();
        }

        let summary = host(&db).poll(Utc::now()).await.unwrap();
        assert_eq!(
            summary,
            PollSummary {
                fired: 2,
                completed: 1,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(db.count_content_items().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_trigger_for_deleted_feed_is_skipped() {
        let db = Database::open(":memory:").await.unwrap();
        let args = TriggerArgs::Interval { feed_id: 99 };
        db.schedule_recurring(
            IMPORT_HOOK,
            Utc::now() - TimeDelta::minutes(1),
            Recurrence::Hourly,
            &args,
        )
        .await
        .unwrap();

        let summary = host(&db).poll(Utc::now()).await.unwrap();
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let db = Database::open(":memory:").await.unwrap();
        let host = host(&db);
        tokio::time::timeout(
            Duration::from_secs(5),
            host.run(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap();
    }
}
