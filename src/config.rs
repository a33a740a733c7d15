//! Configuration file parser for ~/.config/podcast-importer/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde but logged as warnings, since they are
//! usually typos.
use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Unknown timezone {0:?} (expected an IANA name such as \"Europe/Berlin\")")]
    InvalidTimezone(String),

    #[error("Invalid feed URL {0:?}: must be an http or https URL")]
    InvalidUrl(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Importer configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `podcast-importer.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Site timezone (IANA name). Schedules and local publish times use it.
    pub timezone: String,

    pub user_agent: String,

    pub fetch_timeout_secs: u64,

    /// Cap on a feed document's size.
    pub max_feed_bytes: usize,

    /// Cap on a sideloaded image's size.
    pub max_media_bytes: usize,

    /// Items considered per fetch, in feed order.
    pub max_items_per_fetch: usize,

    /// Lifetime of an import lock; a crashed pass blocks its trigger this long.
    pub lock_ttl_minutes: i64,

    /// How often the trigger host looks for due triggers.
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            timezone: "UTC".to_string(),
            user_agent: format!("podcast-importer/{}", env!("CARGO_PKG_VERSION")),
            fetch_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            max_media_bytes: 20 * 1024 * 1024,
            max_items_per_fetch: 10,
            lock_ttl_minutes: 15,
            poll_interval_secs: 30,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Longest allowed import lock lifetime (one week).
    const MAX_LOCK_TTL_MINUTES: i64 = 10_080;

    const KNOWN_KEYS: [&'static str; 9] = [
        "database_path",
        "timezone",
        "user_agent",
        "fetch_timeout_secs",
        "max_feed_bytes",
        "max_media_bytes",
        "max_items_per_fetch",
        "lock_ttl_minutes",
        "poll_interval_secs",
    ];

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing or empty file → defaults
    /// - Invalid TOML → `ConfigError::Parse`
    /// - Unknown timezone → `ConfigError::InvalidTimezone`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), timezone = %config.timezone, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        let positive = [
            ("fetch_timeout_secs", self.fetch_timeout_secs as i64),
            ("max_items_per_fetch", self.max_items_per_fetch as i64),
            ("lock_ttl_minutes", self.lock_ttl_minutes),
            ("poll_interval_secs", self.poll_interval_secs as i64),
        ];
        for (key, value) in positive {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.lock_ttl_minutes > Self::MAX_LOCK_TTL_MINUTES {
            return Err(ConfigError::InvalidValue {
                key: "lock_ttl_minutes",
                reason: format!("must be at most {}", Self::MAX_LOCK_TTL_MINUTES),
            });
        }
        Ok(())
    }

    /// The site timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lock_ttl(&self) -> TimeDelta {
        TimeDelta::minutes(self.lock_ttl_minutes)
    }

    /// Configured database path, or `podcast-importer.db` in `config_dir`.
    pub fn database_path_or(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("podcast-importer.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("podcast_importer_config_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.max_items_per_fetch, 10);
        assert_eq!(config.lock_ttl(), TimeDelta::minutes(15));
        assert_eq!(config.tz().unwrap(), Tz::UTC);
        assert!(config.user_agent.starts_with("podcast-importer/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/podcast_importer_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "timezone = \"Asia/Tokyo\"\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.tz().unwrap(), chrono_tz::Asia::Tokyo);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.database_path, None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/podcasts/import.db"
timezone = "Europe/Berlin"
user_agent = "MyStation/1.0"
fetch_timeout_secs = 10
max_feed_bytes = 2048
max_media_bytes = 4096
max_items_per_fetch = 5
lock_ttl_minutes = 30
poll_interval_secs = 60
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/podcasts/import.db"))
        );
        assert_eq!(config.tz().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(config.user_agent, "MyStation/1.0");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_feed_bytes, 2048);
        assert_eq!(config.max_media_bytes, 4096);
        assert_eq!(config.max_items_per_fetch, 5);
        assert_eq!(config.lock_ttl(), TimeDelta::minutes(30));
        assert_eq!(config.poll_interval(), Duration::from_secs(60));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let (dir, path) = write_config("bad_tz", "timezone = \"Mars/Olympus\"\n");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimezone(ref tz) if tz == "Mars/Olympus"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_values_rejected() {
        let (dir, path) = write_config("zero", "max_items_per_fetch = 0\n");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "max_items_per_fetch",
                ..
            }
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_lock_ttl_capped_at_one_week() {
        let (dir, path) = write_config("huge_ttl", "lock_ttl_minutes = 9223372036854775807\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "lock_ttl_minutes",
                ..
            }
        ));
        std::fs::remove_dir_all(&dir).ok();

        let (dir, path) = write_config("week_ttl", "lock_ttl_minutes = 10080\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.lock_ttl(), TimeDelta::weeks(1));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
timezone = "UTC"
refresh_interval_minutes = 30
"#;
        let (dir, path) = write_config("unknown", content);
        assert!(Config::load(&path).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "poll_interval_secs = \"soon\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_database_path() {
        let config = Config::default();
        assert_eq!(
            config.database_path_or(Path::new("/etc/podcasts")),
            PathBuf::from("/etc/podcasts/podcast-importer.db")
        );
    }
}
