//! Configuration for the rollcall service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RollcallError};
use crate::events::RecurringEventTemplate;
use crate::paths;
use crate::scheduler::RunnerConfig;

/// Environment variable that overrides [`DiscordConfig::bot_token`].
pub const BOT_TOKEN_ENV: &str = "BOT_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollcallConfig {
    /// IANA zone used for day and week boundaries, e.g. `Europe/Berlin`.
    pub timezone: String,
    pub store: StoreConfig,
    pub schedule: ScheduleConfig,
    pub discord: DiscordConfig,
    /// Recurring events written to the store at startup.
    pub templates: Vec<TemplateConfig>,
}

impl Default for RollcallConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_owned(),
            store: StoreConfig::default(),
            schedule: ScheduleConfig::default(),
            discord: DiscordConfig::default(),
            templates: vec![TemplateConfig {
                id: "MainRaid".to_owned(),
                name: "Main Raid".to_owned(),
                weekdays: vec![Weekday::Wed],
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite database under `root_dir`.
    #[default]
    Sqlite,
    /// Process memory; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub root_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            root_dir: paths::data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between runner ticks.
    pub tick_interval_secs: u64,
    /// Ticks earlier in the week than this day do nothing.
    pub earliest_weekday: Weekday,
    /// Weeks scheduled per tick, the current one included.
    pub weeks_ahead: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let runner = RunnerConfig::default();
        Self {
            tick_interval_secs: runner.tick_interval.as_secs(),
            earliest_weekday: runner.earliest_weekday,
            weeks_ahead: runner.weeks_ahead,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// Channel that receives announcements of newly scheduled events.
    pub channel_id: String,
    /// The bot's own user id; its reactions are ignored.
    pub self_user_id: Option<String>,
    /// Announcement title line.
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel_id: String::new(),
            self_user_id: None,
            title: crate::announce::DEFAULT_TITLE.to_owned(),
            thumbnail_url: None,
            api_base: "https://discord.com/api/v10".to_owned(),
        }
    }
}

/// A recurring event as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub id: String,
    pub name: String,
    pub weekdays: Vec<Weekday>,
}

impl TemplateConfig {
    pub fn to_template(&self) -> Result<RecurringEventTemplate> {
        RecurringEventTemplate::new(
            self.id.clone(),
            self.name.clone(),
            self.weekdays.iter().copied(),
        )
    }
}

impl RollcallConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RollcallError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RollcallError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `config.toml` under [`paths::config_dir`].
    pub fn default_config_path() -> PathBuf {
        paths::config_dir().join("config.toml")
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_bot_token(std::env::var(BOT_TOKEN_ENV).ok());
    }

    fn apply_bot_token(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.discord.bot_token = token;
        }
    }

    pub fn zone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| RollcallError::Config(format!("timezone {:?}: {e}", self.timezone)))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            tick_interval: Duration::from_secs(self.schedule.tick_interval_secs.max(1)),
            earliest_weekday: self.schedule.earliest_weekday,
            weeks_ahead: self.schedule.weeks_ahead,
        }
    }

    pub fn recurring_templates(&self) -> Result<Vec<RecurringEventTemplate>> {
        self.templates.iter().map(TemplateConfig::to_template).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn defaults_match_the_daily_raid_schedule() {
        let config = RollcallConfig::default();
        assert_eq!(config.zone().unwrap(), Tz::UTC);
        assert_eq!(config.runner_config(), RunnerConfig::default());
        let templates = config.recurring_templates().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].weekdays, vec![Weekday::Wed]);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = RollcallConfig::default();
        config.timezone = "America/New_York".to_owned();
        config.schedule.weeks_ahead = 5;
        config.discord.channel_id = "256297257052274688".to_owned();
        config.save_to_file(&path).unwrap();

        let loaded = RollcallConfig::from_file(&path).unwrap();
        assert_eq!(loaded.zone().unwrap(), chrono_tz::America::New_York);
        assert_eq!(loaded.schedule.weeks_ahead, 5);
        assert_eq!(loaded.discord.channel_id, "256297257052274688");
        assert_eq!(loaded.templates, config.templates);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
timezone = "Europe/Berlin"

[store]
backend = "memory"

[[templates]]
id = "alt"
name = "Alt Raid"
weekdays = ["Tue", "Thu"]
"#,
        )
        .unwrap();

        let config = RollcallConfig::from_file(&path).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.schedule.weeks_ahead, 3);
        assert_eq!(config.discord.title, "Castle Nathria");
        let templates = config.recurring_templates().unwrap();
        assert_eq!(templates[0].weekdays, vec![Weekday::Tue, Weekday::Thu]);
    }

    #[test]
    fn invalid_toml_and_missing_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            RollcallConfig::from_file(&path),
            Err(RollcallError::Config(_))
        ));
        assert!(matches!(
            RollcallConfig::from_file(&dir.path().join("missing.toml")),
            Err(RollcallError::Io(_))
        ));
    }

    #[test]
    fn unknown_timezone_is_a_config_error() {
        let config = RollcallConfig {
            timezone: "Mars/Olympus".to_owned(),
            ..RollcallConfig::default()
        };
        assert!(matches!(config.zone(), Err(RollcallError::Config(_))));
    }

    #[test]
    fn bot_token_override_ignores_blank_values() {
        let mut config = RollcallConfig::default();
        config.discord.bot_token = "from-file".to_owned();
        config.apply_bot_token(Some("  ".to_owned()));
        assert_eq!(config.discord.bot_token, "from-file");
        config.apply_bot_token(Some("from-env".to_owned()));
        assert_eq!(config.discord.bot_token, "from-env");
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = RollcallConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert_eq!(path.parent(), Some(paths::config_dir().as_path()));
    }
}
