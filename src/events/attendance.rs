//! Per-user absence and lateness marks.
//!
//! A mark is recorded twice: on the day it was made for, and on every event
//! of that day's week. Both halves are written in one batch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone};
use tracing::debug;

use crate::dates::{DateRange, for_each_day};
use crate::error::{Result, ResultExt, RollcallError};
use crate::events::event::{Event, EventStore};
use crate::events::keys;
use crate::store::{Batch, KvStore};

/// Which attendance list a mark belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListType {
    Absent,
    Late,
}

impl ListType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a user is being added to or removed from a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Add,
    Remove,
}

impl Mark {
    fn apply(self, batch: Batch, key: String, user: &str) -> Batch {
        match self {
            Self::Add => batch.sadd(key, user),
            Self::Remove => batch.srem(key, user),
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
        })
    }
}

/// Users on each list, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attendance {
    pub absent: Vec<String>,
    pub late: Vec<String>,
}

impl Attendance {
    pub fn list(&self, list: ListType) -> &[String] {
        match list {
            ListType::Absent => &self.absent,
            ListType::Late => &self.late,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.absent.is_empty() && self.late.is_empty()
    }
}

pub struct AttendanceTracker<S: ?Sized> {
    store: Arc<S>,
    events: EventStore<S>,
}

impl<S: ?Sized> Clone for AttendanceTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            events: self.events.clone(),
        }
    }
}

impl<S: KvStore + ?Sized> AttendanceTracker<S> {
    /// Share the store and time zone of `events`.
    pub fn new(events: EventStore<S>) -> Self {
        Self {
            store: Arc::clone(events.store()),
            events,
        }
    }

    pub fn events(&self) -> &EventStore<S> {
        &self.events
    }

    /// Apply `mark` for `user` on every day of `range`.
    ///
    /// Returns the distinct events touched, in time order. Stops at the
    /// first failing day; earlier days stay applied.
    pub fn mark_for_range<T: TimeZone>(
        &self,
        range: &DateRange<T>,
        user: &str,
        list: ListType,
        mark: Mark,
    ) -> Result<Vec<Event>> {
        let zone = self.events.timezone();
        let local = DateRange::new(
            range.begin.with_timezone(&zone),
            range.end.with_timezone(&zone),
        );

        let mut touched = BTreeMap::new();
        for_each_day(&local, |day| {
            for event in self.mark_day(&day, user, list, mark)? {
                touched.insert(event.id.clone(), event);
            }
            Ok(())
        })?;

        let mut events: Vec<Event> = touched.into_values().collect();
        events.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(events)
    }

    /// Apply `mark` to the day holding `day` and to every event of its week.
    ///
    /// Returns the events of that week.
    pub fn mark_day<T: TimeZone>(
        &self,
        day: &DateTime<T>,
        user: &str,
        list: ListType,
        mark: Mark,
    ) -> Result<Vec<Event>> {
        let week_events = self
            .events
            .get_by_week(day)
            .context("get events for week")?;

        let day_key = keys::day_list_key(list, keys::day_start(day, self.events.timezone()));
        let mut batch = mark.apply(Batch::new(), day_key.clone(), user);
        for event in &week_events {
            batch = mark.apply(batch, keys::event_list_key(&event.id, list), user);
        }

        self.store
            .exec(&batch)
            .map_err(|source| RollcallError::Batch {
                batch: format!("{mark} {list} mark for {day_key}"),
                source,
            })?;
        debug!(user, %list, %mark, day = %day_key, events = week_events.len(), "applied attendance mark");
        Ok(week_events)
    }

    /// Add `user` to one event's list only.
    pub fn add_for_event(&self, event_id: &str, user: &str, list: ListType) -> Result<()> {
        self.store
            .sadd(&keys::event_list_key(event_id, list), user)
            .with_context(|| format!("add {user} to {list} list of event {event_id}"))
    }

    /// Remove `user` from one event's list only.
    pub fn remove_for_event(&self, event_id: &str, user: &str, list: ListType) -> Result<()> {
        self.store
            .srem(&keys::event_list_key(event_id, list), user)
            .with_context(|| format!("remove {user} from {list} list of event {event_id}"))
    }

    /// Day-scoped lists for the day holding `date`.
    pub fn for_day<T: TimeZone>(&self, date: &DateTime<T>) -> Result<Attendance> {
        let start = keys::day_start(date, self.events.timezone());
        Ok(Attendance {
            absent: self
                .store
                .smembers(&keys::day_list_key(ListType::Absent, start))?,
            late: self
                .store
                .smembers(&keys::day_list_key(ListType::Late, start))?,
        })
    }

    /// Event-scoped lists of `event`.
    pub fn for_event(&self, event: &Event) -> Result<Attendance> {
        self.for_event_id(&event.id)
    }

    pub fn for_event_id(&self, event_id: &str) -> Result<Attendance> {
        Ok(Attendance {
            absent: self
                .store
                .smembers(&keys::event_list_key(event_id, ListType::Absent))?,
            late: self
                .store
                .smembers(&keys::event_list_key(event_id, ListType::Late))?,
        })
    }
}
