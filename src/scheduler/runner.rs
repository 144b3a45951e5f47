//! Scheduler background loop.
//!
//! Spawns a tokio task that wakes on a fixed interval, pre-schedules the
//! coming weeks, and brings their announcements up to date. Every failure is
//! logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc, Weekday};
use tracing::{debug, error, info, warn};

use crate::announce::AnnouncementSynchronizer;
use crate::dates::weekday_index;
use crate::error::Result;
use crate::scheduler::{ScheduleReport, Scheduler};
use crate::store::KvStore;

/// Interval between runner ticks.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Number of weeks scheduled on each tick, the current one included.
const DEFAULT_WEEKS_AHEAD: u32 = 3;

/// Timing policy for [`ScheduleRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub tick_interval: Duration,
    /// Ticks on days earlier in the week than this do nothing.
    pub earliest_weekday: Weekday,
    pub weeks_ahead: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            earliest_weekday: Weekday::Fri,
            weeks_ahead: DEFAULT_WEEKS_AHEAD,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub reports: Vec<ScheduleReport>,
    pub announced: usize,
    pub failures: usize,
}

/// Periodic trigger around a [`Scheduler`].
pub struct ScheduleRunner<S: ?Sized> {
    scheduler: Scheduler<S>,
    announcer: Option<AnnouncementSynchronizer<S>>,
    config: RunnerConfig,
}

impl<S: KvStore + ?Sized> ScheduleRunner<S> {
    pub fn new(scheduler: Scheduler<S>, config: RunnerConfig) -> Self {
        Self {
            scheduler,
            announcer: None,
            config,
        }
    }

    /// Announce scheduled events after each tick.
    pub fn with_announcer(mut self, announcer: AnnouncementSynchronizer<S>) -> Self {
        self.announcer = Some(announcer);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn is_active_day<T: TimeZone>(&self, now: &DateTime<T>) -> bool {
        let local = now.with_timezone(&self.scheduler.events().timezone());
        weekday_index(local.weekday()) >= weekday_index(self.config.earliest_weekday)
    }

    /// Run one tick at `now`.
    ///
    /// Returns `None` when `now` falls before the earliest weekday. Weeks that
    /// fail to schedule are logged and counted, not returned as errors.
    pub fn tick(&self, now: DateTime<Utc>) -> Option<TickSummary> {
        if !self.is_active_day(&now) {
            debug!(%now, "before earliest scheduling day, skipping tick");
            return None;
        }

        let zone = self.scheduler.events().timezone();
        let local = now.with_timezone(&zone);
        let mut summary = TickSummary::default();

        for week in 0..self.config.weeks_ahead {
            let date = crate::dates::add_days(&local, 7 * i64::from(week));
            match self.scheduler.schedule_week(&date) {
                Ok(report) => {
                    info!(%report, "scheduled week");
                    summary.reports.push(report);
                }
                Err(e) => {
                    error!("schedule week of {}: {e}", date.date_naive());
                    summary.failures += 1;
                    continue;
                }
            }

            if let Err(e) = self.announce_week(&date, &mut summary) {
                error!("announce week of {}: {e}", date.date_naive());
                summary.failures += 1;
            }
        }

        Some(summary)
    }

    fn announce_week<T: TimeZone>(&self, date: &DateTime<T>, summary: &mut TickSummary) -> Result<()> {
        let Some(announcer) = self.announcer.as_ref() else {
            return Ok(());
        };
        for event in self.scheduler.events().get_by_week(date)? {
            match announcer.sync(&event) {
                Ok(_) => summary.announced += 1,
                Err(e) => {
                    warn!(event_id = %event.id, "announce event failed: {e}");
                    summary.failures += 1;
                }
            }
        }
        Ok(())
    }
}

impl<S: KvStore + ?Sized + 'static> ScheduleRunner<S> {
    /// Start the background loop. The first tick runs immediately.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let period = self.config.tick_interval.max(Duration::from_secs(1));
        let runner = Arc::new(self);

        tokio::spawn(async move {
            info!(
                "schedule runner started: every {}s, {} weeks ahead",
                period.as_secs(),
                runner.config.weeks_ahead
            );
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                let tick_runner = Arc::clone(&runner);
                match tokio::task::spawn_blocking(move || tick_runner.tick(Utc::now())).await {
                    Ok(Some(summary)) if summary.failures > 0 => {
                        warn!("schedule tick finished with {} failures", summary.failures);
                    }
                    Ok(_) => {}
                    Err(e) => error!("schedule tick aborted: {e}"),
                }
            }
        })
    }
}
