//! Chat front end: runs parsed commands and reaction changes against the
//! scheduler, attendance tracker, and announcements.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::announce::{AnnouncementSynchronizer, DATE_FORMAT, LATE_EMOJI, OUT_EMOJI};
use crate::commands::{self, Command, HELP_TEXT};
use crate::dates::DateRange;
use crate::error::{Result, ResultExt, RollcallError};
use crate::events::{AttendanceTracker, Event, ListType, Mark};
use crate::scheduler::Scheduler;
use crate::store::KvStore;

/// Source of the current time.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Bot<S: ?Sized> {
    scheduler: Scheduler<S>,
    attendance: AttendanceTracker<S>,
    announcer: AnnouncementSynchronizer<S>,
    clock: Clock,
    self_user_id: Option<String>,
}

impl<S: KvStore + ?Sized> Bot<S> {
    pub fn new(scheduler: Scheduler<S>, announcer: AnnouncementSynchronizer<S>) -> Self {
        let attendance = AttendanceTracker::new(scheduler.events().clone());
        Self {
            scheduler,
            attendance,
            announcer,
            clock: Box::new(Utc::now),
            self_user_id: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Ignore reactions made by this user id (the bot's own).
    pub fn with_self_user(mut self, user_id: impl Into<String>) -> Self {
        self.self_user_id = Some(user_id.into());
        self
    }

    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    pub fn announcer(&self) -> &AnnouncementSynchronizer<S> {
        &self.announcer
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Parse and run one chat message.
    ///
    /// Returns `Ok(None)` for messages that are not commands.
    pub fn handle_message(&self, text: &str, sender: &str, channel: &str) -> Result<Option<String>> {
        let now = self.now().with_timezone(&self.scheduler.events().timezone());
        let command = match commands::parse(text, &now) {
            Ok(command) => command,
            Err(RollcallError::MissingPrefix) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.execute(&command, sender, channel).map(Some)
    }

    /// Run `command` on behalf of `sender` in `channel` and return the reply.
    pub fn execute(&self, command: &Command, sender: &str, channel: &str) -> Result<String> {
        debug!(%command, sender, channel, "execute command");
        match command {
            Command::Help => Ok(HELP_TEXT.to_owned()),
            Command::SetName(name) => {
                info!(user_id = sender, alias = %name, "set user alias");
                self.announcer
                    .aliases()
                    .set(sender, name)
                    .context("set user name")?;
                Ok(format!(
                    "From this day forward we call you '{name}'... I hope you are happy."
                ))
            }
            Command::Attendance { list, mark, range } => {
                self.mark_attendance(range, sender, *list, *mark)
            }
            Command::Schedule => {
                let report = self
                    .scheduler
                    .schedule_week(&self.now())
                    .context("schedule week")?;
                Ok(format!("Scheduled {report}"))
            }
            Command::Events => self.list_events(),
            Command::Announce => self.announce_week(channel),
        }
    }

    fn mark_attendance(
        &self,
        range: &DateRange<chrono_tz::Tz>,
        user: &str,
        list: ListType,
        mark: Mark,
    ) -> Result<String> {
        let verb = Command::attendance_verb(list, mark);
        info!(user_id = user, %list, %mark, begin = %range.begin, end = %range.end, "mark user for range");
        let touched = self
            .attendance
            .mark_for_range(range, user, list, mark)
            .with_context(|| format!("mark user {verb} for range"))?;

        for event in touched.iter().filter(|e| e.announcement().is_some()) {
            self.announcer
                .sync(event)
                .with_context(|| format!("announce event {}", event.id))?;
        }

        let alias = self
            .announcer
            .aliases()
            .resolve(user, self.announcer.sink().as_ref())
            .context("fetch user alias")?;
        Ok(format!(
            "Marked '{alias}' {verb} for all events between {} and {}",
            range.begin.format(DATE_FORMAT),
            range.end.format(DATE_FORMAT)
        ))
    }

    fn list_events(&self) -> Result<String> {
        let zone = self.scheduler.events().timezone();
        let week = DateRange::week_of(&self.now().with_timezone(&zone));
        let events = self
            .scheduler
            .events()
            .get_for_range(&week)
            .context("get events for week")?;

        let mut reply = format!(
            "Upcoming events for the week of {} to {}",
            week.begin.format(DATE_FORMAT),
            week.end.format(DATE_FORMAT)
        );
        if events.is_empty() {
            reply.push_str("\nNothing scheduled");
        }
        for event in &events {
            reply.push_str(&format!(
                "\n{} - {}",
                event.name,
                event.scheduled_time.with_timezone(&zone).format(DATE_FORMAT)
            ));
        }
        Ok(reply)
    }

    fn announce_week(&self, channel: &str) -> Result<String> {
        let events = self
            .scheduler
            .events()
            .get_by_week(&self.now())
            .context("get events for week")?;
        for event in &events {
            self.announcer
                .sync_in(event, channel)
                .with_context(|| format!("announce event {}", event.id))?;
        }
        Ok(format!("Announced {} events", events.len()))
    }

    /// Apply a reaction added to or removed from an announcement.
    ///
    /// Returns the affected event, or `None` when the reaction is ignored:
    /// the bot's own, an unrelated emoji, or a message that announces nothing.
    pub fn handle_reaction(
        &self,
        channel: &str,
        message: &str,
        emoji: &str,
        user: &str,
        added: bool,
    ) -> Result<Option<Event>> {
        if self.self_user_id.as_deref() == Some(user) {
            return Ok(None);
        }
        let list = match emoji {
            OUT_EMOJI => ListType::Absent,
            LATE_EMOJI => ListType::Late,
            _ => return Ok(None),
        };

        let event = match self.scheduler.events().get_by_message(channel, message) {
            Ok(event) => event,
            Err(e) if e.is_event_not_found() => return Ok(None),
            Err(e) => return Err(e).context("get event by message"),
        };

        if added {
            info!(user_id = user, %list, event_id = %event.id, "add user to event list");
            self.attendance.add_for_event(&event.id, user, list)?;
        } else {
            info!(user_id = user, %list, event_id = %event.id, "remove user from event list");
            self.attendance.remove_for_event(&event.id, user, list)?;
        }

        let event = self.announcer.sync(&event).context("announce event")?;
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::Arc;

    use super::*;
    use crate::announce::testing::{Call, RecordingSink};
    use crate::events::{EventStore, RecurringEventTemplate};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Weekday};

    fn bot(sink: RecordingSink) -> (Arc<RecordingSink>, Bot<MemoryStore>) {
        let events = EventStore::new(Arc::new(MemoryStore::new()));
        let sink = Arc::new(sink);
        let scheduler = Scheduler::new(events.clone());
        scheduler
            .templates()
            .upsert(&RecurringEventTemplate::new("raid1", "Main Raid", [Weekday::Wed]).unwrap())
            .unwrap();
        let announcer =
            AnnouncementSynchronizer::new(events, sink.clone()).with_default_channel("raids");
        let bot = Bot::new(scheduler, announcer)
            .with_clock(Box::new(|| Utc.with_ymd_and_hms(2021, 1, 4, 12, 0, 0).unwrap()))
            .with_self_user("bot");
        (sink, bot)
    }

    #[test]
    fn non_commands_are_ignored() {
        let (_, bot) = bot(RecordingSink::default());
        assert_eq!(bot.handle_message("hello there", "u1", "c").unwrap(), None);
        assert!(bot.handle_message("!nope", "u1", "c").is_err());
    }

    #[test]
    fn schedule_then_announce_posts_in_the_command_channel() {
        let (sink, bot) = bot(RecordingSink::default());
        let reply = bot.handle_message("!schedule", "u1", "c").unwrap().unwrap();
        assert!(reply.contains("1 created"), "{reply}");

        let reply = bot.handle_message("!announce", "u1", "here").unwrap().unwrap();
        assert_eq!(reply, "Announced 1 events");
        assert!(matches!(&sink.calls()[0], Call::Send { channel, .. } if channel == "here"));
    }

    #[test]
    fn out_marks_the_week_and_refreshes_announcements() {
        let (sink, bot) = bot(RecordingSink::default().with_name("u1", "alice"));
        bot.handle_message("!schedule", "u1", "c").unwrap();
        bot.handle_message("!announce", "u1", "c").unwrap();

        let reply = bot.handle_message("!out", "u1", "c").unwrap().unwrap();
        assert_eq!(
            reply,
            "Marked 'alice' out for all events between Sunday Jan  3 2021 and Saturday Jan  9 2021"
        );
        assert_eq!(sink.last().unwrap().out, ["alice"]);

        bot.handle_message("!in", "u1", "c").unwrap();
        assert!(sink.last().unwrap().out.is_empty());
    }

    #[test]
    fn setname_changes_the_displayed_name() {
        let (_, bot) = bot(RecordingSink::default().with_name("u1", "alice"));
        let reply = bot.handle_message("!setname Big Tank", "u1", "c").unwrap().unwrap();
        assert!(reply.contains("'Big-Tank'"));
        let reply = bot.handle_message("!late 1/6", "u1", "c").unwrap().unwrap();
        assert!(reply.starts_with("Marked 'Big-Tank' late"), "{reply}");
    }

    #[test]
    fn events_lists_the_current_week() {
        let (_, bot) = bot(RecordingSink::default());
        let empty = bot.handle_message("!events", "u1", "c").unwrap().unwrap();
        assert!(empty.ends_with("Nothing scheduled"));

        bot.handle_message("!schedule", "u1", "c").unwrap();
        let listed = bot.handle_message("!events", "u1", "c").unwrap().unwrap();
        assert!(listed.contains("Main Raid - Wednesday Jan  6 2021"), "{listed}");
    }

    #[test]
    fn reactions_toggle_event_lists() {
        let (sink, bot) = bot(RecordingSink::default().with_name("u2", "bob"));
        bot.handle_message("!schedule", "u1", "c").unwrap();
        bot.handle_message("!announce", "u1", "c").unwrap();

        let event = bot
            .handle_reaction("c", "msg-0", LATE_EMOJI, "u2", true)
            .unwrap()
            .unwrap();
        assert_eq!(sink.last().unwrap().late, ["bob"]);
        assert_eq!(bot.attendance.for_event(&event).unwrap().late, ["u2"]);

        bot.handle_reaction("c", "msg-0", LATE_EMOJI, "u2", false)
            .unwrap();
        assert!(sink.last().unwrap().late.is_empty());
    }

    #[test]
    fn ignored_reactions() {
        let (_, bot) = bot(RecordingSink::default());
        bot.handle_message("!schedule", "u1", "c").unwrap();
        bot.handle_message("!announce", "u1", "c").unwrap();

        assert!(bot.handle_reaction("c", "msg-0", "👍", "u2", true).unwrap().is_none());
        assert!(bot.handle_reaction("c", "msg-0", OUT_EMOJI, "bot", true).unwrap().is_none());
        assert!(bot.handle_reaction("c", "unknown", OUT_EMOJI, "u2", true).unwrap().is_none());
    }
}
