//! Rollcall: recurring event scheduling and attendance tracking.
//!
//! Recurring events ("every Wednesday") are expanded into dated events one
//! week at a time. Users mark themselves out or late for a day or a range of
//! days, and each event's announcement message in chat lists who is missing.
//!
//! # Architecture
//!
//! Every component works against an injected [`store::KvStore`]:
//! - **store**: key-value backends (`MemoryStore`, `SqliteStore`)
//! - **events**: event, recurring event, and attendance records
//! - **scheduler**: week expansion with de-duplication, plus the daily runner
//! - **announce**: announcement rendering and the chat sink boundary
//! - **commands** / **bot**: chat command parsing and dispatch

pub mod announce;
pub mod bot;
pub mod commands;
pub mod config;
pub mod dates;
pub mod error;
pub mod events;
pub mod paths;
pub mod scheduler;
pub mod store;

pub use announce::{Announcement, AnnouncementSink, AnnouncementSynchronizer, DiscordSink};
pub use bot::Bot;
pub use config::RollcallConfig;
pub use error::{Result, RollcallError};
pub use events::{
    Attendance, AttendanceTracker, Event, EventStatus, EventStore, ListType, Mark,
    RecurringEventTemplate, TemplateStore,
};
pub use scheduler::{ScheduleReport, ScheduleRunner, Scheduler};
pub use store::{KvStore, MemoryStore, SqliteStore};
