//! Store key layout.
//!
//! These strings are the on-disk contract with existing data; change them
//! only together with a migration.

use std::time::Duration;

use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;

use crate::dates::{beginning_of_day, beginning_of_week};
use crate::events::attendance::ListType;

/// Lifetime of event records and the indices derived from them.
pub const RETENTION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Set of every recurring event id. Never expires.
pub const RECURRING_INDEX: &str = "index:recurring";

pub fn event_key(id: &str) -> String {
    format!("event:{id}")
}

/// Week index for the week starting at `week_start` (epoch seconds).
pub fn week_index_key(week_start: i64) -> String {
    format!("index:events_by_week:{week_start}")
}

/// Epoch seconds of the Sunday midnight, in `zone`, of the week holding `date`.
pub fn week_start<T: TimeZone>(date: &DateTime<T>, zone: Tz) -> i64 {
    beginning_of_week(&date.with_timezone(&zone)).timestamp()
}

/// Epoch seconds of midnight, in `zone`, of the day holding `date`.
pub fn day_start<T: TimeZone>(date: &DateTime<T>, zone: Tz) -> i64 {
    beginning_of_day(&date.with_timezone(&zone)).timestamp()
}

pub fn message_index_key(channel_id: &str, message_id: &str) -> String {
    format!("index:event_by_message:{channel_id}:{message_id}")
}

pub fn recurring_key(id: &str) -> String {
    format!("recurring:{id}")
}

/// Day-scoped attendance set for the day starting at `day_start`.
pub fn day_list_key(list: ListType, day_start: i64) -> String {
    format!("{}:{day_start}", list.as_str())
}

/// Event-scoped attendance set.
pub fn event_list_key(event_id: &str, list: ListType) -> String {
    format!("event:{event_id}:{}", list.as_str())
}

pub fn alias_key(user_id: &str) -> String {
    format!("alias:{user_id}")
}

/// Advisory lock held while one recurring event is scheduled for one week.
pub fn schedule_lock_key(template_id: &str, week_start: i64) -> String {
    format!("lock:schedule:{template_id}:{week_start}")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::Utc;

    #[test]
    fn keys_match_the_stored_layout() {
        assert_eq!(event_key("abc"), "event:abc");
        assert_eq!(week_index_key(1609632000), "index:events_by_week:1609632000");
        assert_eq!(
            message_index_key("chan", "msg"),
            "index:event_by_message:chan:msg"
        );
        assert_eq!(recurring_key("raid1"), "recurring:raid1");
        assert_eq!(day_list_key(ListType::Absent, 10), "absent:10");
        assert_eq!(event_list_key("abc", ListType::Late), "event:abc:late");
        assert_eq!(alias_key("42"), "alias:42");
    }

    #[test]
    fn week_start_is_sunday_midnight_utc() {
        let monday = Utc.with_ymd_and_hms(2021, 1, 4, 18, 0, 0).unwrap();
        let sunday = Utc.with_ymd_and_hms(2021, 1, 3, 0, 0, 0).unwrap();
        assert_eq!(week_start(&monday, Tz::UTC), sunday.timestamp());
        assert_eq!(day_start(&monday, Tz::UTC), sunday.timestamp() + 86_400);
    }

    #[test]
    fn week_start_follows_the_configured_zone() {
        // Saturday evening in New York is already Sunday in UTC.
        let t = Utc.with_ymd_and_hms(2021, 1, 10, 2, 0, 0).unwrap();
        let utc_week = week_start(&t, Tz::UTC);
        let ny_week = week_start(&t, chrono_tz::America::New_York);
        assert_ne!(utc_week, ny_week);
        assert!(ny_week < utc_week);
    }
}
