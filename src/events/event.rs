//! Concrete event instances and their store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dates::{DateRange, MAX_RANGE_DAYS, add_days, beginning_of_week};
use crate::error::{Result, ResultExt, RollcallError};
use crate::events::keys;
use crate::store::{Batch, KvStore};

/// Lifecycle state of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// Created by the scheduler, not yet announced.
    Unscheduled,
    /// An announcement message exists.
    Scheduled,
    Canceled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unscheduled => "Unscheduled",
            Self::Scheduled => "Scheduled",
            Self::Canceled => "Canceled",
        }
    }

    /// Parse the stored representation. Matching is exact.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Unscheduled" => Some(Self::Unscheduled),
            "Scheduled" => Some(Self::Scheduled),
            "Canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single dated occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    /// Start instant, whole seconds.
    pub scheduled_time: DateTime<Utc>,
    pub status: EventStatus,
    /// Recurring event this occurrence was generated from.
    pub recurring_template_id: Option<String>,
    pub announce_channel_id: Option<String>,
    pub announce_message_id: Option<String>,
}

impl Event {
    /// A fresh unscheduled event with a random id.
    pub fn new(name: impl Into<String>, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            scheduled_time,
            status: EventStatus::Unscheduled,
            recurring_template_id: None,
            announce_channel_id: None,
            announce_message_id: None,
        }
    }

    /// `(channel, message)` of the announcement, when both are known.
    pub fn announcement(&self) -> Option<(&str, &str)> {
        let channel = non_empty(self.announce_channel_id.as_deref())?;
        let message = non_empty(self.announce_message_id.as_deref())?;
        Some((channel, message))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn take_optional(fields: &mut HashMap<String, String>, field: &str) -> Option<String> {
    fields.remove(field).filter(|v| !v.is_empty())
}

fn decode(key: &str, mut fields: HashMap<String, String>) -> Result<Event> {
    let invalid = |field: &'static str, value: &str| RollcallError::InvalidField {
        key: key.to_owned(),
        field,
        value: value.to_owned(),
    };

    let raw_time = fields.remove("time").unwrap_or_default();
    let scheduled_time = raw_time
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| invalid("time", &raw_time))?;

    let raw_status = fields.remove("status").unwrap_or_default();
    let status = EventStatus::parse(&raw_status).ok_or_else(|| invalid("status", &raw_status))?;

    Ok(Event {
        id: fields.remove("id").unwrap_or_default(),
        name: fields.remove("name").unwrap_or_default(),
        scheduled_time,
        status,
        recurring_template_id: take_optional(&mut fields, "recurring_event_id"),
        announce_channel_id: take_optional(&mut fields, "announce_channel_id"),
        announce_message_id: take_optional(&mut fields, "announce_message_id"),
    })
}

/// Reads and writes [`Event`] records and their week and message indices.
///
/// Week indices are keyed by the Sunday midnight of the store's time zone.
pub struct EventStore<S: ?Sized> {
    store: Arc<S>,
    zone: Tz,
}

impl<S: ?Sized> Clone for EventStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            zone: self.zone,
        }
    }
}

impl<S: KvStore + ?Sized> EventStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            zone: Tz::UTC,
        }
    }

    /// Compute week boundaries in `zone` instead of UTC.
    pub fn with_timezone(mut self, zone: Tz) -> Self {
        self.zone = zone;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.zone
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Week index key for the week holding `date`.
    pub fn week_key<T: TimeZone>(&self, date: &DateTime<T>) -> String {
        keys::week_index_key(keys::week_start(date, self.zone))
    }

    /// Upsert `event` together with its week and message indices.
    ///
    /// All writes land in a single batch and every key gets the retention
    /// expiry.
    pub fn save(&self, event: &Event) -> Result<()> {
        let key = keys::event_key(&event.id);
        let week_key = self.week_key(&event.scheduled_time);

        let mut batch = Batch::new()
            .hset(&key, "id", &event.id)
            .hset(&key, "name", &event.name)
            .hset(&key, "time", event.scheduled_time.timestamp().to_string())
            .hset(&key, "status", event.status.as_str())
            .hset(
                &key,
                "recurring_event_id",
                event.recurring_template_id.as_deref().unwrap_or(""),
            )
            .hset(
                &key,
                "announce_channel_id",
                event.announce_channel_id.as_deref().unwrap_or(""),
            )
            .hset(
                &key,
                "announce_message_id",
                event.announce_message_id.as_deref().unwrap_or(""),
            );

        if let Some((channel, message)) = event.announcement() {
            batch = batch.set(
                keys::message_index_key(channel, message),
                &event.id,
                Some(keys::RETENTION),
            );
        }

        let batch = batch
            .sadd(&week_key, &event.id)
            .expire(&key, keys::RETENTION)
            .expire(&week_key, keys::RETENTION);

        self.store
            .exec(&batch)
            .map_err(|source| RollcallError::Batch {
                batch: format!("upsert event {}", event.id),
                source,
            })?;
        debug!(event_id = %event.id, time = %event.scheduled_time, status = %event.status, "saved event");
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Event> {
        let key = keys::event_key(id);
        let fields = self.store.hgetall(&key)?;
        if fields.is_empty() {
            return Err(RollcallError::NotFound {
                kind: "event",
                id: id.to_owned(),
            });
        }
        decode(&key, fields)
    }

    /// Resolve an announcement message back to its event.
    ///
    /// A missing or dangling index entry yields [`RollcallError::EventNotFound`].
    pub fn get_by_message(&self, channel_id: &str, message_id: &str) -> Result<Event> {
        let index = keys::message_index_key(channel_id, message_id);
        let Some(id) = self.store.get(&index)? else {
            return Err(RollcallError::EventNotFound);
        };
        match self.get_by_id(&id) {
            Err(RollcallError::NotFound { .. }) => Err(RollcallError::EventNotFound),
            other => other,
        }
    }

    /// Every event indexed under the week holding `date`, in time order.
    ///
    /// Index members whose record has expired are skipped.
    pub fn get_by_week<T: TimeZone>(&self, date: &DateTime<T>) -> Result<Vec<Event>> {
        let week_key = self.week_key(date);
        let ids = self.store.smembers(&week_key)?;

        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_by_id(&id) {
                Ok(event) => events.push(event),
                Err(RollcallError::NotFound { .. }) => {
                    debug!(event_id = %id, week = %week_key, "skipping expired week member");
                }
                Err(e) => return Err(e).with_context(|| format!("get event {id}")),
            }
        }
        events.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(events)
    }

    /// Every event whose start lies in `range`, in time order.
    pub fn get_for_range<T: TimeZone>(&self, range: &DateRange<T>) -> Result<Vec<Event>> {
        let begin = range.begin.with_timezone(&self.zone);
        let end = range.end.with_timezone(&self.zone);
        if end.clone() - begin.clone() > chrono::TimeDelta::days(MAX_RANGE_DAYS) {
            return Err(RollcallError::RangeTooLarge);
        }

        let mut events = Vec::new();
        let mut week = beginning_of_week(&begin);
        while week <= end {
            let label = week.date_naive();
            let found = self
                .get_by_week(&week)
                .with_context(|| format!("get events for week of {label}"))?;
            events.extend(found.into_iter().filter(|e| range.contains(&e.scheduled_time)));
            week = add_days(&week, 7);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::store::{MemoryStore, StoreError};

    fn store() -> (Arc<MemoryStore>, EventStore<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        (Arc::clone(&kv), EventStore::new(kv))
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn event(id: &str, time: DateTime<Utc>) -> Event {
        Event {
            id: id.to_owned(),
            ..Event::new("Castle Nathria", time)
        }
    }

    #[test]
    fn save_then_get_round_trips_every_field() {
        let (_, events) = store();
        let mut e = event("e1", at(2021, 1, 6, 0));
        e.status = EventStatus::Scheduled;
        e.recurring_template_id = Some("raid1".to_owned());
        e.announce_channel_id = Some("chan".to_owned());
        e.announce_message_id = Some("msg".to_owned());
        events.save(&e).unwrap();

        assert_eq!(events.get_by_id("e1").unwrap(), e);
        assert_eq!(events.get_by_message("chan", "msg").unwrap(), e);
    }

    #[test]
    fn existing_records_decode() {
        let (kv, events) = store();
        let week_key = "index:events_by_week:1609632000";
        kv.exec(
            &Batch::new()
                .hset("event:x", "id", "x")
                .hset("event:x", "name", "Main Raid")
                .hset("event:x", "time", "1609891200")
                .hset("event:x", "status", "Scheduled")
                .hset("event:x", "recurring_event_id", "MainRaid")
                .hset("event:x", "announce_message_id", "m1")
                .hset("event:x", "announce_channel_id", "c1")
                .set("index:event_by_message:c1:m1", "x", None)
                .sadd(week_key, "x"),
        )
        .unwrap();

        let expected = Event {
            id: "x".to_owned(),
            name: "Main Raid".to_owned(),
            scheduled_time: at(2021, 1, 6, 0),
            status: EventStatus::Scheduled,
            recurring_template_id: Some("MainRaid".to_owned()),
            announce_channel_id: Some("c1".to_owned()),
            announce_message_id: Some("m1".to_owned()),
        };
        assert_eq!(events.get_by_id("x").unwrap(), expected);
        assert_eq!(events.get_by_message("c1", "m1").unwrap(), expected);
        assert_eq!(events.get_by_week(&at(2021, 1, 4, 0)).unwrap(), [expected]);
    }

    #[test]
    fn status_is_written_capitalised() {
        let (kv, events) = store();
        for status in [
            EventStatus::Unscheduled,
            EventStatus::Scheduled,
            EventStatus::Canceled,
        ] {
            let mut e = event("e1", at(2021, 1, 6, 0));
            e.status = status;
            events.save(&e).unwrap();
            assert_eq!(kv.hgetall("event:e1").unwrap()["status"], status.to_string());
            assert_eq!(events.get_by_id("e1").unwrap().status, status);
        }
        assert_eq!(EventStatus::Unscheduled.as_str(), "Unscheduled");
        assert_eq!(EventStatus::parse("scheduled"), None);
    }

    #[test]
    fn empty_optional_fields_read_back_as_none() {
        let (_, events) = store();
        let mut e = event("e1", at(2021, 1, 6, 0));
        e.announce_channel_id = Some(String::new());
        events.save(&e).unwrap();

        let read = events.get_by_id("e1").unwrap();
        assert_eq!(read.announce_channel_id, None);
        assert_eq!(read.recurring_template_id, None);
        assert_eq!(read.status, EventStatus::Unscheduled);
    }

    #[test]
    fn save_sets_retention_on_record_and_week_index() {
        let (kv, events) = store();
        let e = event("e1", at(2021, 1, 6, 0));
        events.save(&e).unwrap();

        let week_key = events.week_key(&e.scheduled_time);
        assert_eq!(week_key, "index:events_by_week:1609632000");
        assert!(kv.sismember(&week_key, "e1").unwrap());
        for key in [keys::event_key("e1"), week_key] {
            let ttl = kv.ttl(&key).unwrap().unwrap();
            assert!(ttl > keys::RETENTION - std::time::Duration::from_secs(60));
        }
    }

    #[test]
    fn get_by_id_reports_missing_records() {
        let (_, events) = store();
        let err = events.get_by_id("nope").unwrap_err();
        assert!(matches!(err, RollcallError::NotFound { kind: "event", .. }));
    }

    #[test]
    fn get_by_message_without_index_is_event_not_found() {
        let (_, events) = store();
        let err = events.get_by_message("chan", "unknown").unwrap_err();
        assert!(err.is_event_not_found());
    }

    #[test]
    fn get_by_message_with_dangling_index_is_event_not_found() {
        let (kv, events) = store();
        kv.set(&keys::message_index_key("chan", "msg"), "gone", None)
            .unwrap();
        let err = events.get_by_message("chan", "msg").unwrap_err();
        assert!(err.is_event_not_found());
    }

    #[test]
    fn get_by_week_orders_by_time_and_skips_expired_members() {
        let (kv, events) = store();
        events.save(&event("late", at(2021, 1, 8, 20))).unwrap();
        events.save(&event("early", at(2021, 1, 4, 20))).unwrap();
        kv.sadd(&events.week_key(&at(2021, 1, 4, 0)), "expired")
            .unwrap();

        let found = events.get_by_week(&at(2021, 1, 5, 0)).unwrap();
        let ids: Vec<_> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["early", "late"]);
    }

    #[test]
    fn corrupt_record_is_reported_with_its_key() {
        let (kv, events) = store();
        kv.exec(&Batch::new().hset("event:bad", "time", "soon"))
            .unwrap();
        let err = events.get_by_id("bad").unwrap_err();
        assert!(matches!(
            err,
            RollcallError::InvalidField { field: "time", .. }
        ));
    }

    #[test]
    fn get_for_range_spans_weeks_and_filters_to_range() {
        let (_, events) = store();
        events.save(&event("before", at(2021, 1, 3, 12))).unwrap();
        events.save(&event("first", at(2021, 1, 8, 20))).unwrap();
        events.save(&event("second", at(2021, 1, 11, 20))).unwrap();
        events.save(&event("after", at(2021, 1, 20, 20))).unwrap();

        let range = DateRange::new(at(2021, 1, 8, 0), at(2021, 1, 12, 0));
        let found = events.get_for_range(&range).unwrap();
        let ids: Vec<_> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["first", "second"]);
    }

    #[test]
    fn get_for_range_rejects_more_than_a_year() {
        let (_, events) = store();
        let range = DateRange::new(at(2021, 1, 1, 0), at(2022, 6, 1, 0));
        assert!(matches!(
            events.get_for_range(&range),
            Err(RollcallError::RangeTooLarge)
        ));
    }

    #[test]
    fn failed_save_names_the_batch_and_writes_nothing() {
        let (kv, events) = store();
        let e = event("e1", at(2021, 1, 6, 0));
        kv.set(&events.week_key(&e.scheduled_time), "not a set", None)
            .unwrap();

        let err = events.save(&e).unwrap_err();
        match err {
            RollcallError::Batch { batch, source } => {
                assert_eq!(batch, "upsert event e1");
                assert!(matches!(source, StoreError::WrongType { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!kv.exists(&keys::event_key("e1")).unwrap());
    }

    #[test]
    fn week_keys_follow_the_store_time_zone() {
        let (kv, _) = store();
        let events = EventStore::new(kv).with_timezone(chrono_tz::America::New_York);
        // Saturday 21:00 in New York, already Sunday in UTC.
        let e = event("e1", at(2021, 1, 10, 2));
        events.save(&e).unwrap();

        let found = events.get_by_week(&at(2021, 1, 4, 12)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(events.timezone(), chrono_tz::America::New_York);
    }
}
