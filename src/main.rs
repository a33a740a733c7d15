use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};

use podcast_importer::app::App;
use podcast_importer::config::Config;
use podcast_importer::import::ImportOutcome;
use podcast_importer::schedule::{RebuildReport, Schedule, IMPORT_HOOK};
use podcast_importer::storage::{parse_tags, Database, DatabaseError, FeedConfig, FeedDraft};
use podcast_importer::traits::JobScheduler;

/// Get the config directory path (~/.config/podcast-importer/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("podcast-importer");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(
    name = "podcast-importer",
    about = "Scheduled podcast feed importer"
)]
struct Args {
    /// Config file (defaults to ~/.config/podcast-importer/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trigger host until interrupted
    Serve,
    /// List configured feeds
    List,
    /// Add a feed
    Add {
        url: String,
        #[command(flatten)]
        fields: FeedFields,
    },
    /// Edit a feed; omitted fields keep their current values
    Edit {
        id: i64,
        /// New feed URL
        #[arg(long)]
        url: Option<String>,
        #[command(flatten)]
        fields: FeedFields,
    },
    /// Remove a feed and its triggers
    Remove { id: i64 },
    /// Import a feed now
    Fetch { id: i64 },
    /// Rebuild every trigger from the feed list
    Reschedule,
    /// Show registered triggers
    Triggers,
}

#[derive(ClapArgs, Debug)]
struct FeedFields {
    /// Category id
    #[arg(long)]
    category: Option<i64>,

    /// Comma-separated tags
    #[arg(long)]
    tags: Option<String>,

    /// Fetch on a fixed interval (every15min, hourly, every6hours, twicedaily, daily)
    #[arg(long, value_name = "INTERVAL", group = "schedule")]
    every: Option<String>,

    /// Fetch daily at HH:MM site time
    #[arg(long, value_name = "HH:MM", group = "schedule")]
    at: Option<String>,

    /// Fetch on weekdays, e.g. "mon=07:00,19:00;thu=08:00"
    #[arg(long, value_name = "DAYS", group = "schedule")]
    weekly: Option<String>,

    /// Never fetch automatically
    #[arg(long, group = "schedule")]
    no_schedule: bool,
}

impl FeedFields {
    /// The schedule these flags ask for, if any flag was given.
    fn schedule(&self) -> Result<Option<Schedule>> {
        if let Some(interval) = &self.every {
            return Ok(Some(Schedule::Interval {
                interval: interval.clone(),
            }));
        }
        if let Some(time) = &self.at {
            return Ok(Some(Schedule::Time { time: time.clone() }));
        }
        if let Some(days) = &self.weekly {
            let schedule = Schedule::parse_weekly(days).context("Invalid --weekly value")?;
            return Ok(Some(schedule));
        }
        if self.no_schedule {
            return Ok(Some(Schedule::None));
        }
        Ok(None)
    }

    fn apply(&self, mut draft: FeedDraft) -> Result<FeedDraft> {
        if let Some(category) = self.category {
            draft.category_id = Some(category);
        }
        if let Some(tags) = &self.tags {
            draft.tags = parse_tags(tags);
        }
        if let Some(schedule) = self.schedule()? {
            draft.schedule = schedule;
        }
        Ok(draft)
    }
}

fn print_report(report: &RebuildReport) {
    println!(
        "Triggers: {} scheduled, {} duplicate",
        report.scheduled, report.duplicates
    );
    for (feed_id, error) in &report.failed {
        eprintln!("Warning: feed {} not scheduled: {}", feed_id, error);
    }
}

fn describe_schedule(schedule: &Schedule) -> String {
    match schedule {
        Schedule::None => "manual".to_string(),
        Schedule::Unreadable(_) => "unreadable, set a new schedule".to_string(),
        Schedule::Interval { interval } => format!("every {}", interval),
        Schedule::Time { time } => format!("daily at {}", time),
        Schedule::Weekly { days } => {
            let enabled: Vec<String> = days
                .iter()
                .filter(|(_, slot)| slot.enabled)
                .map(|(day, slot)| format!("{}={}", day, slot.times.join(",")))
                .collect();
            format!("weekly {}", enabled.join(";"))
        }
    }
}

fn print_feed(feed: &FeedConfig) {
    println!(
        "{:>4}  {}  [{}]{}{}",
        feed.id,
        feed.url,
        describe_schedule(&feed.schedule),
        feed.category_id
            .map(|c| format!("  category={}", c))
            .unwrap_or_default(),
        if feed.tags.is_empty() {
            String::new()
        } else {
            format!("  tags={}", feed.tags.join(","))
        },
    );
}

fn prepare_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // Config and database are user-only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let data_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_dir.clone());
    let db_path = config.database_path_or(&data_dir);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            prepare_config_dir(parent)?;
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: The database at {} is locked by another process. Close it and try again.",
                db_path.display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let app = App::new(db, config).context("Failed to create application")?;

    match args.command {
        Command::Serve => {
            let report = app
                .manager
                .reschedule()
                .await
                .context("Failed to rebuild triggers")?;
            print_report(&report);

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            };
            app.host().run(shutdown).await;
            println!("Goodbye!");
        }
        Command::List => {
            let feeds = app.manager.list().await?;
            if feeds.is_empty() {
                println!("No feeds configured. Add one with: podcast-importer add <url>");
            }
            for feed in &feeds {
                print_feed(feed);
            }
        }
        Command::Add { url, fields } => {
            let draft = fields.apply(FeedDraft::new(url))?;
            let saved = app.manager.save(None, draft).await?;
            println!("Added feed {}", saved.id);
            print_report(&saved.report);
        }
        Command::Edit { id, url, fields } => {
            let mut draft = FeedDraft::from(app.manager.get(id).await?);
            if let Some(url) = url {
                draft.url = url;
            }
            let draft = fields.apply(draft)?;
            let saved = app.manager.save(Some(id), draft).await?;
            println!("Updated feed {}", saved.id);
            print_report(&saved.report);
        }
        Command::Remove { id } => {
            let report = app.manager.delete(id).await?;
            println!("Removed feed {}", id);
            print_report(&report);
        }
        Command::Fetch { id } => {
            let outcome = app
                .orchestrator
                .run_manual(id)
                .await
                .context("Import failed")?;
            match outcome {
                ImportOutcome::Completed(stats) => println!(
                    "Imported {} new episodes ({} already present, {} thumbnails, {} media failures)",
                    stats.imported, stats.skipped, stats.thumbnails, stats.media_failures
                ),
                ImportOutcome::Locked => {
                    println!("Feed {} is already being imported, try again later", id)
                }
                ImportOutcome::FeedMissing => anyhow::bail!("No feed with id {}", id),
                ImportOutcome::MissingUrl => anyhow::bail!("Feed {} has no URL", id),
                ImportOutcome::FetchFailed(e) => anyhow::bail!("Failed to fetch feed {}: {}", id, e),
            }
        }
        Command::Reschedule => {
            let report = app.manager.reschedule().await?;
            print_report(&report);
        }
        Command::Triggers => {
            let triggers = app.db.scheduled(IMPORT_HOOK).await?;
            if triggers.is_empty() {
                println!("No triggers registered.");
            }
            for trigger in &triggers {
                println!(
                    "{}  {:<10}  {}",
                    trigger.next_fire_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    trigger.recurrence.name(),
                    trigger.args
                );
            }
        }
    }

    Ok(())
}
