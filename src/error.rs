//! Error types for the scheduling and attendance engine.

use crate::store::StoreError;

/// Top-level error type for rollcall.
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    /// No event is registered for an announcement message.
    #[error("event could not be found")]
    EventNotFound,

    /// A record (event, recurring event) does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind, e.g. `"event"`.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A weekday list contained something other than the integers 0-6.
    #[error("invalid weekday: {0:?}")]
    InvalidWeekday(String),

    /// A recurring event was defined without any weekday.
    #[error("recurring event {0} has no weekdays")]
    EmptyWeekdays(String),

    /// A date range exceeded the one year iteration cap.
    #[error("date range must be less than one year")]
    RangeTooLarge,

    /// A stored field could not be decoded.
    #[error("invalid {field} {value:?} stored at {key}")]
    InvalidField {
        /// Store key holding the record.
        key: String,
        /// Field name within the record.
        field: &'static str,
        /// Raw stored value.
        value: String,
    },

    /// User supplied text could not be parsed.
    #[error("input could not be parsed: {0:?}")]
    Parse(String),

    /// Chat text that is not a command at all.
    #[error("commands must start with the prefix '!'")]
    MissingPrefix,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Single store read or write failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A multi-operation write batch failed as a whole.
    #[error("batch {batch} failed: {source}")]
    Batch {
        /// Human readable batch name.
        batch: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Chat platform error while publishing an announcement.
    #[error("announce error: {0}")]
    Announce(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error annotated with the sub-operation that produced it.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted.
        context: String,
        /// The wrapped failure.
        #[source]
        source: Box<RollcallError>,
    },
}

impl RollcallError {
    /// Innermost error beneath any context wrappers.
    pub fn root(&self) -> &RollcallError {
        let mut current = self;
        while let RollcallError::Context { source, .. } = current {
            current = &**source;
        }
        current
    }

    /// `true` when the root cause is a missing announcement mapping.
    pub fn is_event_not_found(&self) -> bool {
        matches!(self.root(), RollcallError::EventNotFound)
    }

    /// `true` for any lookup miss (record or announcement mapping).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            RollcallError::EventNotFound | RollcallError::NotFound { .. }
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RollcallError>;

/// Attach the failing sub-operation to an error.
pub trait ResultExt<T> {
    /// Wrap the error with a static description.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built description.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<RollcallError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RollcallError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| RollcallError::Context {
            context: f(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn missing_message() -> Result<()> {
        Err(RollcallError::EventNotFound)
    }

    #[test]
    fn event_not_found_survives_context_wrapping() {
        let err = missing_message()
            .context("lookup event by message")
            .context("handle reaction")
            .unwrap_err();
        assert!(err.is_event_not_found());
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "handle reaction: lookup event by message: event could not be found"
        );
    }

    #[test]
    fn store_errors_are_not_lookup_misses() {
        let err: Result<()> = Err(StoreError::Lock("poisoned".to_owned())).context("read event");
        let err = err.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err.root(), RollcallError::Store(_)));
    }

    #[test]
    fn not_found_is_distinct_from_event_not_found() {
        let err = RollcallError::NotFound {
            kind: "event",
            id: "abc".to_owned(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_event_not_found());
        assert_eq!(err.to_string(), "event not found: abc");
    }
}
