//! Events, recurring events, and attendance.
//!
//! Sub-modules:
//! - `keys`: store key layout and retention.
//! - `event`: `Event` records and the `EventStore`.
//! - `recurring`: `RecurringEventTemplate` records and the `TemplateStore`.
//! - `attendance`: absence/lateness marks and the `AttendanceTracker`.

pub mod attendance;
pub mod event;
pub mod keys;
pub mod recurring;

pub use attendance::{Attendance, AttendanceTracker, ListType, Mark};
pub use event::{Event, EventStatus, EventStore};
pub use recurring::{
    RecurringEventTemplate, TemplateStore, deserialize_weekdays, serialize_weekdays,
};
