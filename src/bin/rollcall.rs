//! CLI binary for rollcall.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rollcall::announce::{Announcement, AnnouncementSink};
use rollcall::config::StoreBackend;
use rollcall::{
    AnnouncementSynchronizer, Bot, DiscordSink, EventStore, KvStore, MemoryStore, RollcallConfig,
    ScheduleRunner, Scheduler, SqliteStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Rollcall: recurring event scheduling and attendance tracking.
#[derive(Parser)]
#[command(name = "rollcall", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the scheduling loop until Ctrl+C.
    Run,

    /// Schedule recurring events for the coming weeks.
    Schedule {
        /// Number of weeks, the current one included.
        #[arg(short, long)]
        weeks: Option<u32>,
    },

    /// List this week's events.
    Events,

    /// Run a chat command as a user, e.g. `exec --user 42 "!out 12/20"`.
    Exec {
        /// User id the command runs as.
        #[arg(short, long)]
        user: String,

        /// Channel the command was sent in.
        #[arg(long)]
        channel: Option<String>,

        /// Command text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Apply an announcement reaction as a user.
    React {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        message: String,
        #[arg(short, long)]
        user: String,
        /// Reaction emoji.
        #[arg(long)]
        emoji: String,
        /// Treat the reaction as removed rather than added.
        #[arg(long)]
        remove: bool,
    },

    /// Post or refresh this week's announcements.
    Announce,
}

/// Prints announcements instead of posting them. Used without a bot token.
struct ConsoleSink {
    next_message: AtomicUsize,
}

impl AnnouncementSink for ConsoleSink {
    fn send(&self, channel_id: &str, announcement: &Announcement) -> rollcall::Result<String> {
        let id = format!(
            "console-{}-{}",
            Utc::now().timestamp(),
            self.next_message.fetch_add(1, Ordering::Relaxed)
        );
        println!("[{channel_id}] new announcement {id}\n{}\n", announcement.to_text());
        Ok(id)
    }

    fn edit(
        &self,
        channel_id: &str,
        message_id: &str,
        announcement: &Announcement,
    ) -> rollcall::Result<()> {
        println!("[{channel_id}] updated announcement {message_id}\n{}\n", announcement.to_text());
        Ok(())
    }

    fn ensure_reaction(&self, _channel_id: &str, _message_id: &str, _emoji: &str) -> rollcall::Result<()> {
        Ok(())
    }

    fn display_name(&self, _user_id: &str) -> rollcall::Result<Option<String>> {
        Ok(None)
    }
}

/// Store, sink, and components built from the config.
struct App {
    config: RollcallConfig,
    events: EventStore<dyn KvStore>,
    sink: Arc<dyn AnnouncementSink>,
}

impl App {
    fn build(config: RollcallConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn KvStore> = match config.store.backend {
            StoreBackend::Sqlite => {
                let store = SqliteStore::new(&config.store.root_dir).with_context(|| {
                    format!("open store in {}", config.store.root_dir.display())
                })?;
                let purged = store.purge_expired()?;
                info!(purged, path = ?store.path(), "opened sqlite store");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                warn!("using in-memory store; nothing is kept after exit");
                Arc::new(MemoryStore::new())
            }
        };

        let events = EventStore::new(store).with_timezone(config.zone()?);

        let sink: Arc<dyn AnnouncementSink> = if config.discord.bot_token.trim().is_empty() {
            info!("no bot token configured, printing announcements");
            Arc::new(ConsoleSink {
                next_message: AtomicUsize::new(0),
            })
        } else {
            let mut discord = DiscordSink::new(config.discord.bot_token.clone())
                .with_api_base(config.discord.api_base.clone());
            if let Some(url) = &config.discord.thumbnail_url {
                discord = discord.with_thumbnail(url.clone());
            }
            Arc::new(discord)
        };

        let app = Self {
            config,
            events,
            sink,
        };
        app.seed_templates()?;
        Ok(app)
    }

    fn seed_templates(&self) -> anyhow::Result<()> {
        let scheduler = self.scheduler();
        for template in self.config.recurring_templates()? {
            scheduler.templates().upsert(&template)?;
        }
        Ok(())
    }

    fn scheduler(&self) -> Scheduler<dyn KvStore> {
        Scheduler::new(self.events.clone())
    }

    fn announcer(&self) -> AnnouncementSynchronizer<dyn KvStore> {
        AnnouncementSynchronizer::new(self.events.clone(), Arc::clone(&self.sink))
            .with_default_channel(self.config.discord.channel_id.clone())
            .with_title(self.config.discord.title.clone())
    }

    fn bot(&self) -> Bot<dyn KvStore> {
        let bot = Bot::new(self.scheduler(), self.announcer());
        match &self.config.discord.self_user_id {
            Some(id) => bot.with_self_user(id.clone()),
            None => bot,
        }
    }

    fn default_channel(&self) -> String {
        let channel = self.config.discord.channel_id.clone();
        if channel.is_empty() {
            "console".to_owned()
        } else {
            channel
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rollcall=info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(RollcallConfig::default_config_path);
    let mut config = if config_path.exists() {
        RollcallConfig::from_file(&config_path)
            .with_context(|| format!("load config {}", config_path.display()))?
    } else {
        RollcallConfig::default()
    };
    config.apply_env();

    let app = App::build(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(app).await,
        Command::Schedule { weeks } => {
            let weeks = weeks.unwrap_or(app.config.schedule.weeks_ahead);
            for report in app.scheduler().schedule_ahead(&Utc::now(), weeks)? {
                println!("{report}");
            }
            Ok(())
        }
        Command::Events => {
            let bot = app.bot();
            println!("{}", bot.execute(&rollcall::commands::Command::Events, "cli", "console")?);
            Ok(())
        }
        Command::Exec {
            user,
            channel,
            text,
        } => {
            let channel = channel.unwrap_or_else(|| app.default_channel());
            match app.bot().handle_message(&text.join(" "), &user, &channel)? {
                Some(reply) => println!("{reply}"),
                None => anyhow::bail!("not a command: commands start with '!'"),
            }
            Ok(())
        }
        Command::React {
            channel,
            message,
            user,
            emoji,
            remove,
        } => {
            match app
                .bot()
                .handle_reaction(&channel, &message, &emoji, &user, !remove)?
            {
                Some(event) => println!("updated {} ({})", event.name, event.id),
                None => println!("reaction ignored"),
            }
            Ok(())
        }
        Command::Announce => {
            let channel = app.default_channel();
            let reply = app.bot().execute(
                &rollcall::commands::Command::Announce,
                "cli",
                &channel,
            )?;
            println!("{reply}");
            Ok(())
        }
    }
}

async fn run(app: App) -> anyhow::Result<()> {
    println!("rollcall v{}", env!("CARGO_PKG_VERSION"));

    let runner = ScheduleRunner::new(app.scheduler(), app.config.runner_config())
        .with_announcer(app.announcer());
    let handle = runner.spawn();

    println!("Scheduling loop running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl+C, shutting down...");
    handle.abort();
    Ok(())
}
