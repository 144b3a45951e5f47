//! Announcement messages for events.
//!
//! Every event gets one message in a chat channel listing who is out and who
//! is late. Users react to the message to change their own marks.
//!
//! Sub-modules:
//! - `alias`: display names for user ids.
//! - `discord`: REST implementation of [`AnnouncementSink`].

pub mod alias;
pub mod discord;

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, ResultExt, RollcallError};
use crate::events::{Attendance, AttendanceTracker, Event, EventStatus, EventStore};
use crate::store::KvStore;

pub use alias::AliasDirectory;
pub use discord::DiscordSink;

/// Reaction that marks the reacting user out.
pub const OUT_EMOJI: &str = "❌";
/// Reaction that marks the reacting user late.
pub const LATE_EMOJI: &str = "🕘";

pub const NOBODY: &str = "No one 👍";
pub const INSTRUCTIONS: &str = "React with 🕘 to mark yourself late or ❌ for out";
pub const DEFAULT_TITLE: &str = "Castle Nathria";
/// `Wednesday Jan  6 2021`
pub const DATE_FORMAT: &str = "%A %b %e %Y";

/// Rendered content of an event announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub event_id: String,
    /// Shown as the message author line.
    pub event_name: String,
    pub title: String,
    pub date_line: String,
    /// Display names of users marked out.
    pub out: Vec<String>,
    /// Display names of users marked late.
    pub late: Vec<String>,
}

impl Announcement {
    pub fn out_field(&self) -> String {
        name_list(&self.out)
    }

    pub fn late_field(&self) -> String {
        name_list(&self.late)
    }

    pub fn footer(&self) -> String {
        format!("id: {}", self.event_id)
    }

    /// Plain text rendering for terminals and logs.
    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n\n{OUT_EMOJI} Out\n{}\n\n{LATE_EMOJI} Late\n{}\n\n{INSTRUCTIONS}\n{}",
            self.event_name,
            self.title,
            self.date_line,
            self.out_field(),
            self.late_field(),
            self.footer()
        )
    }
}

fn name_list(names: &[String]) -> String {
    if names.is_empty() {
        NOBODY.to_owned()
    } else {
        names.join("\n")
    }
}

/// Chat platform that can publish announcements.
pub trait AnnouncementSink: Send + Sync {
    /// Post a new announcement and return its message id.
    fn send(&self, channel_id: &str, announcement: &Announcement) -> Result<String>;

    /// Replace the content of an existing announcement.
    fn edit(&self, channel_id: &str, message_id: &str, announcement: &Announcement) -> Result<()>;

    /// Add the bot's own `emoji` reaction to a message. Adding twice is a no-op.
    fn ensure_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    /// Platform display name for `user_id`, if the user is known.
    fn display_name(&self, user_id: &str) -> Result<Option<String>>;
}

/// Keeps each event's announcement message in step with its attendance.
pub struct AnnouncementSynchronizer<S: ?Sized> {
    events: EventStore<S>,
    attendance: AttendanceTracker<S>,
    aliases: AliasDirectory<S>,
    sink: Arc<dyn AnnouncementSink>,
    default_channel: Option<String>,
    title: String,
}

impl<S: KvStore + ?Sized> AnnouncementSynchronizer<S> {
    pub fn new(events: EventStore<S>, sink: Arc<dyn AnnouncementSink>) -> Self {
        let attendance = AttendanceTracker::new(events.clone());
        let aliases = AliasDirectory::new(Arc::clone(events.store()));
        Self {
            events,
            attendance,
            aliases,
            sink,
            default_channel: None,
            title: DEFAULT_TITLE.to_owned(),
        }
    }

    /// Channel used for events that have never been announced.
    pub fn with_default_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.default_channel = Some(channel_id.into()).filter(|c: &String| !c.is_empty());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn aliases(&self) -> &AliasDirectory<S> {
        &self.aliases
    }

    pub fn sink(&self) -> &Arc<dyn AnnouncementSink> {
        &self.sink
    }

    /// Build the announcement for `event` from its event-scoped attendance.
    pub fn render(&self, event: &Event) -> Result<Announcement> {
        let Attendance { absent, late } = self
            .attendance
            .for_event(event)
            .context("get attendance for event")?;
        let local = event.scheduled_time.with_timezone(&self.events.timezone());

        Ok(Announcement {
            event_id: event.id.clone(),
            event_name: event.name.clone(),
            title: self.title.clone(),
            date_line: local.format(DATE_FORMAT).to_string(),
            out: self
                .resolve_names(&absent)
                .context("format absent user list")?,
            late: self
                .resolve_names(&late)
                .context("format late user list")?,
        })
    }

    fn resolve_names(&self, user_ids: &[String]) -> Result<Vec<String>> {
        user_ids
            .iter()
            .map(|id| self.aliases.resolve(id, self.sink.as_ref()))
            .collect()
    }

    /// Edit the existing announcement of `event`, or post a new one.
    ///
    /// A new message goes to the event's channel, else the default channel.
    /// Its identity is saved on the event, which becomes
    /// [`EventStatus::Scheduled`]. Returns the event as stored afterwards.
    pub fn sync(&self, event: &Event) -> Result<Event> {
        let announcement = self.render(event)?;

        if let Some((channel, message)) = event.announcement() {
            debug!(event_id = %event.id, channel, message, "update announcement");
            self.sink
                .edit(channel, message, &announcement)
                .context("update announce message")?;
            self.ensure_reactions(channel, message)?;
            return Ok(event.clone());
        }

        let channel = event
            .announce_channel_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.default_channel.as_deref())
            .ok_or_else(|| {
                RollcallError::Announce(format!("no channel to announce event {}", event.id))
            })?
            .to_owned();

        let message = self
            .sink
            .send(&channel, &announcement)
            .context("send announce message")?;

        let mut updated = event.clone();
        updated.announce_channel_id = Some(channel.clone());
        updated.announce_message_id = Some(message.clone());
        updated.status = EventStatus::Scheduled;
        self.events.save(&updated).context("update event")?;
        info!(event_id = %updated.id, channel = %channel, message = %message, "announced event");

        self.ensure_reactions(&channel, &message)?;
        Ok(updated)
    }

    /// Like [`sync`](Self::sync), posting to `channel_id` when the event has
    /// no announcement yet.
    pub fn sync_in(&self, event: &Event, channel_id: &str) -> Result<Event> {
        if event.announcement().is_some() {
            return self.sync(event);
        }
        let mut target = event.clone();
        target.announce_channel_id = Some(channel_id.to_owned());
        self.sync(&target)
    }

    fn ensure_reactions(&self, channel_id: &str, message_id: &str) -> Result<()> {
        for emoji in [OUT_EMOJI, LATE_EMOJI] {
            self.sink
                .ensure_reaction(channel_id, message_id, emoji)
                .with_context(|| format!("add reaction {emoji}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink for tests.
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Send { channel: String, message: String },
        Edit { channel: String, message: String },
        React { message: String, emoji: String },
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) calls: Mutex<Vec<Call>>,
        pub(crate) last: Mutex<Option<Announcement>>,
        pub(crate) names: HashMap<String, String>,
    }

    impl RecordingSink {
        pub(crate) fn with_name(mut self, user: &str, name: &str) -> Self {
            self.names.insert(user.to_owned(), name.to_owned());
            self
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn last(&self) -> Option<Announcement> {
            self.last.lock().unwrap().clone()
        }
    }

    impl AnnouncementSink for RecordingSink {
        fn send(&self, channel_id: &str, announcement: &Announcement) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            let message = format!("msg-{}", calls.len());
            calls.push(Call::Send {
                channel: channel_id.to_owned(),
                message: message.clone(),
            });
            *self.last.lock().unwrap() = Some(announcement.clone());
            Ok(message)
        }

        fn edit(&self, channel_id: &str, message_id: &str, announcement: &Announcement) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Edit {
                channel: channel_id.to_owned(),
                message: message_id.to_owned(),
            });
            *self.last.lock().unwrap() = Some(announcement.clone());
            Ok(())
        }

        fn ensure_reaction(&self, _channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Call::React {
                message: message_id.to_owned(),
                emoji: emoji.to_owned(),
            });
            Ok(())
        }

        fn display_name(&self, user_id: &str) -> Result<Option<String>> {
            Ok(self.names.get(user_id).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::testing::{Call, RecordingSink};
    use super::*;
    use crate::events::ListType;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn setup(
        sink: RecordingSink,
    ) -> (
        Arc<RecordingSink>,
        EventStore<MemoryStore>,
        AnnouncementSynchronizer<MemoryStore>,
    ) {
        let events = EventStore::new(Arc::new(MemoryStore::new()));
        let sink = Arc::new(sink);
        let sync = AnnouncementSynchronizer::new(events.clone(), sink.clone())
            .with_default_channel("raid-chan");
        (sink, events, sync)
    }

    fn wednesday_raid() -> Event {
        Event {
            id: "e1".to_owned(),
            ..Event::new(
                "Main Raid",
                Utc.with_ymd_and_hms(2021, 1, 6, 0, 0, 0).unwrap(),
            )
        }
    }

    #[test]
    fn empty_lists_render_as_nobody() {
        let (_, events, sync) = setup(RecordingSink::default());
        let event = wednesday_raid();
        events.save(&event).unwrap();

        let announcement = sync.render(&event).unwrap();
        assert_eq!(announcement.title, DEFAULT_TITLE);
        assert_eq!(announcement.date_line, "Wednesday Jan  6 2021");
        assert_eq!(announcement.out_field(), NOBODY);
        assert_eq!(announcement.late_field(), NOBODY);
        assert_eq!(announcement.footer(), "id: e1");
        assert!(announcement.to_text().contains(INSTRUCTIONS));
    }

    #[test]
    fn first_sync_posts_saves_identity_and_reacts() {
        let (sink, events, sync) = setup(RecordingSink::default());
        let event = wednesday_raid();
        events.save(&event).unwrap();

        let updated = sync.sync(&event).unwrap();
        assert_eq!(updated.status, EventStatus::Scheduled);
        assert_eq!(updated.announcement(), Some(("raid-chan", "msg-0")));
        assert_eq!(events.get_by_message("raid-chan", "msg-0").unwrap(), updated);
        assert_eq!(
            sink.calls(),
            [
                Call::Send {
                    channel: "raid-chan".to_owned(),
                    message: "msg-0".to_owned()
                },
                Call::React {
                    message: "msg-0".to_owned(),
                    emoji: OUT_EMOJI.to_owned()
                },
                Call::React {
                    message: "msg-0".to_owned(),
                    emoji: LATE_EMOJI.to_owned()
                },
            ]
        );
    }

    #[test]
    fn second_sync_edits_in_place() {
        let (sink, events, sync) = setup(RecordingSink::default().with_name("u1", "Alice"));
        let event = wednesday_raid();
        events.save(&event).unwrap();
        let announced = sync.sync(&event).unwrap();

        AttendanceTracker::new(events.clone())
            .add_for_event("e1", "u1", ListType::Absent)
            .unwrap();
        sync.sync(&announced).unwrap();

        assert!(sink.calls().contains(&Call::Edit {
            channel: "raid-chan".to_owned(),
            message: "msg-0".to_owned()
        }));
        assert_eq!(sink.last().unwrap().out, ["Alice"]);
    }

    #[test]
    fn sync_in_only_redirects_unannounced_events() {
        let (sink, events, sync) = setup(RecordingSink::default());
        let event = wednesday_raid();
        events.save(&event).unwrap();

        let updated = sync.sync_in(&event, "other-chan").unwrap();
        assert_eq!(updated.announcement(), Some(("other-chan", "msg-0")));

        sync.sync_in(&updated, "third-chan").unwrap();
        assert!(sink.calls().contains(&Call::Edit {
            channel: "other-chan".to_owned(),
            message: "msg-0".to_owned()
        }));
    }

    #[test]
    fn missing_channel_is_an_announce_error() {
        let events = EventStore::new(Arc::new(MemoryStore::new()));
        let sync = AnnouncementSynchronizer::new(events, Arc::new(RecordingSink::default()));
        let err = sync.sync(&wednesday_raid()).unwrap_err();
        assert!(matches!(err, RollcallError::Announce(_)));
    }
}
