use chrono::Weekday;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::engine::recommendation::CollectFilter;
use crate::engine::scheduler::WeeklySchedule;
use crate::engine::uri::UriIdentity;
use crate::error::{BotError, Result};

/// Longest accepted flush period: one week.
const MAX_FLUSH_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
/// Longest accepted aggregation window: ten years.
const MAX_WINDOW_DAYS: i64 = 3650;

/// Top-level bot configuration, loaded from slurper.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub bot: BotSection,
    pub database: DatabaseSection,
    pub state: StateSection,
    pub flush: FlushSection,
    pub schedule: ScheduleSection,
    pub recommendations: RecommendationsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BotSection {
    /// Where the platform bridge client connects.
    pub bridge_address: String,
    /// The bot's own user id. Its messages are never collected.
    pub user_id: u64,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            bridge_address: "127.0.0.1:7878".into(),
            user_id: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:slurper_state/recommendations.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// Guild configuration snapshot, written on shutdown.
    pub snapshot_path: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("slurper_state/spotify.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FlushSection {
    pub interval_secs: u64,
}

impl Default for FlushSection {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub weekday: Weekday,
    /// Hour of day, UTC.
    pub hour: u32,
    pub window_days: i64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            weekday: Weekday::Fri,
            hour: 12,
            window_days: 7,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RecommendationsSection {
    pub uri_identity: UriIdentity,
    pub collect: CollectFilter,
}

impl BotConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)
                .map_err(|e| BotError::Config(format!("{}: {e}", path.display())))?
        } else {
            info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("BRIDGE_ADDRESS") {
            self.bot.bridge_address = v;
        }
        if let Some(v) = var("BOT_USER_ID")
            && let Ok(id) = v.parse()
        {
            self.bot.user_id = id;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("SNAPSHOT_PATH") {
            self.state.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = var("FLUSH_INTERVAL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.flush.interval_secs = secs;
        }
        if let Some(v) = var("WINDOW_DAYS")
            && let Ok(days) = v.parse()
        {
            self.schedule.window_days = days;
        }
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_FLUSH_INTERVAL_SECS).contains(&self.flush.interval_secs) {
            return Err(BotError::Config(format!(
                "flush.interval_secs must be between 1 and {MAX_FLUSH_INTERVAL_SECS}, got {}",
                self.flush.interval_secs
            )));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.schedule.window_days) {
            return Err(BotError::Config(format!(
                "schedule.window_days must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                self.schedule.window_days
            )));
        }
        self.weekly_schedule()?;
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush.interval_secs)
    }

    /// Aggregation window, clamped to the range `validate` accepts.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.schedule.window_days.clamp(1, MAX_WINDOW_DAYS))
    }

    pub fn weekly_schedule(&self) -> Result<WeeklySchedule> {
        WeeklySchedule::new(self.schedule.weekday, self.schedule.hour)
    }
}
