//! Turns recurring events into dated events.
//!
//! [`Scheduler::schedule_week`] is a function of (recurring events, events
//! already in the week, target week). It holds no timers; the periodic
//! trigger lives in [`runner`].

pub mod runner;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::dates::{add_days, beginning_of_day, beginning_of_week, day_of_week};
use crate::error::{Result, ResultExt};
use crate::events::{
    Event, EventStatus, EventStore, RecurringEventTemplate, TemplateStore, keys,
};
use crate::store::KvStore;

pub use runner::{RunnerConfig, ScheduleRunner};

/// Produces ids for newly scheduled events.
pub type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// How long a per-week scheduling lock may be held before it lapses.
const SCHEDULE_LOCK_TTL: Duration = Duration::from_secs(30);

fn uuid_ids() -> IdGenerator {
    Box::new(|| uuid::Uuid::new_v4().to_string())
}

/// Outcome of scheduling one week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Sunday midnight of the week, in the scheduler's time zone.
    pub week_start: DateTime<Tz>,
    /// Events written by this call.
    pub created: Vec<Event>,
    /// Occurrences that already existed.
    pub skipped: usize,
    /// Recurring events left alone because another caller held their lock.
    pub contended: Vec<String>,
}

impl fmt::Display for ScheduleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "week of {}: {} created, {} already scheduled",
            self.week_start.format("%Y-%m-%d"),
            self.created.len(),
            self.skipped
        )?;
        if !self.contended.is_empty() {
            write!(f, ", {} busy", self.contended.len())?;
        }
        Ok(())
    }
}

/// One candidate event per weekday of `template`, at midnight of that day in
/// the week holding `date`.
pub fn expand_template<T: TimeZone>(
    template: &RecurringEventTemplate,
    date: &DateTime<T>,
    next_id: &dyn Fn() -> String,
) -> Vec<Event> {
    template
        .weekdays
        .iter()
        .map(|weekday| Event {
            id: next_id(),
            name: template.name.clone(),
            scheduled_time: beginning_of_day(&day_of_week(date, *weekday)).with_timezone(&Utc),
            status: EventStatus::Unscheduled,
            recurring_template_id: Some(template.id.clone()),
            announce_channel_id: None,
            announce_message_id: None,
        })
        .collect()
}

/// Whether `existing` already holds an occurrence of the same recurring
/// event at the same instant as `candidate`. Names are not compared.
pub fn contains_occurrence(existing: &[Event], candidate: &Event) -> bool {
    candidate.recurring_template_id.is_some()
        && existing.iter().any(|e| {
            e.recurring_template_id == candidate.recurring_template_id
                && e.scheduled_time == candidate.scheduled_time
        })
}

pub struct Scheduler<S: ?Sized> {
    events: EventStore<S>,
    templates: TemplateStore<S>,
    next_id: IdGenerator,
    lock_ttl: Duration,
}

impl<S: KvStore + ?Sized> Scheduler<S> {
    /// Schedule into `events`, reading recurring events from the same store.
    pub fn new(events: EventStore<S>) -> Self {
        let templates = TemplateStore::new(Arc::clone(events.store()));
        Self {
            events,
            templates,
            next_id: uuid_ids(),
            lock_ttl: SCHEDULE_LOCK_TTL,
        }
    }

    /// Replace the event id source.
    pub fn with_id_generator(mut self, next_id: IdGenerator) -> Self {
        self.next_id = next_id;
        self
    }

    /// Replace how long a per-week lock outlives a stalled holder.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn events(&self) -> &EventStore<S> {
        &self.events
    }

    pub fn templates(&self) -> &TemplateStore<S> {
        &self.templates
    }

    /// Create every missing recurring occurrence in the week holding `date`.
    ///
    /// Safe to repeat: occurrences already present are skipped. Each
    /// recurring event is checked and written under its own advisory lock.
    pub fn schedule_week<T: TimeZone>(&self, date: &DateTime<T>) -> Result<ScheduleReport> {
        let local = date.with_timezone(&self.events.timezone());
        let week_start = beginning_of_week(&local);
        let templates = self
            .templates
            .list_all()
            .context("list recurring events")?;

        let mut report = ScheduleReport {
            week_start: week_start.clone(),
            created: Vec::new(),
            skipped: 0,
            contended: Vec::new(),
        };

        for template in &templates {
            let lock = keys::schedule_lock_key(&template.id, week_start.timestamp());
            let Some(token) = self.acquire_lock(&lock)? else {
                debug!(template_id = %template.id, week = %week_start, "recurring event busy, skipping");
                report.contended.push(template.id.clone());
                continue;
            };

            let outcome = self.schedule_template(template, &local, &mut report);
            let released = self.release_lock(&lock, &token);
            outcome.with_context(|| format!("schedule recurring event {}", template.id))?;
            released?;
        }

        Ok(report)
    }

    /// Take `lock` under a fresh token. `None` when someone else holds it.
    fn acquire_lock(&self, lock: &str) -> Result<Option<String>> {
        let token = uuid::Uuid::new_v4().to_string();
        let acquired = self
            .events
            .store()
            .set_nx(lock, &token, Some(self.lock_ttl))
            .with_context(|| format!("acquire {lock}"))?;
        Ok(acquired.then_some(token))
    }

    /// Drop `lock` only while it still carries `token`.
    fn release_lock(&self, lock: &str, token: &str) -> Result<()> {
        let released = self
            .events
            .store()
            .del_if_eq(lock, token)
            .with_context(|| format!("release {lock}"))?;
        if !released {
            debug!(lock, "lock lapsed before release, leaving current holder alone");
        }
        Ok(())
    }

    fn schedule_template(
        &self,
        template: &RecurringEventTemplate,
        date: &DateTime<Tz>,
        report: &mut ScheduleReport,
    ) -> Result<()> {
        let existing = self
            .events
            .get_by_week(date)
            .context("get events for week")?;

        for candidate in expand_template(template, date, &*self.next_id) {
            if contains_occurrence(&existing, &candidate) {
                report.skipped += 1;
                continue;
            }
            self.events.save(&candidate)?;
            info!(
                event_id = %candidate.id,
                template_id = %template.id,
                time = %candidate.scheduled_time,
                "scheduled event"
            );
            report.created.push(candidate);
        }
        Ok(())
    }

    /// Schedule `weeks` consecutive weeks starting with the one holding `from`.
    pub fn schedule_ahead<T: TimeZone>(
        &self,
        from: &DateTime<T>,
        weeks: u32,
    ) -> Result<Vec<ScheduleReport>> {
        let local = from.with_timezone(&self.events.timezone());
        (0..weeks)
            .map(|week| self.schedule_week(&add_days(&local, 7 * i64::from(week))))
            .collect()
    }
}
