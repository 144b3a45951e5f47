//! Chat command parsing.
//!
//! Commands are `!`-prefixed words. Attendance commands take optional date
//! flags understood by [`flags_to_date_range`].

use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;

use crate::dates::{DateRange, flags_to_date_range};
use crate::error::{Result, ResultExt, RollcallError};
use crate::events::{ListType, Mark};

pub const PREFIX: &str = "!";

pub const HELP_TEXT: &str = "\
!help - prints the available commands and their usage.
!setname <name> - sets the name shown for you in announcements.
!out [date] [to date] - marks you out. Defaults to this week.
!in [date] [to date] - clears an out mark.
!late [date] [to date] - marks you late.
!ontime [date] [to date] - clears a late mark.
!schedule - creates this week's recurring events.
!events - lists this week's events.
!announce - posts or refreshes this week's announcements here.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Set the sender's alias. Words are joined with `-`.
    SetName(String),
    /// Change the sender's attendance over a range of days.
    Attendance {
        list: ListType,
        mark: Mark,
        range: DateRange<Tz>,
    },
    Schedule,
    Events,
    Announce,
}

impl Command {
    /// Word used in replies, e.g. `out` or `on time`.
    pub fn attendance_verb(list: ListType, mark: Mark) -> &'static str {
        match (list, mark) {
            (ListType::Absent, Mark::Add) => "out",
            (ListType::Absent, Mark::Remove) => "in",
            (ListType::Late, Mark::Add) => "late",
            (ListType::Late, Mark::Remove) => "on time",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => f.write_str("!help"),
            Self::SetName(name) => write!(f, "!setname {name}"),
            Self::Attendance { list, mark, range } => write!(
                f,
                "!{} {} to {}",
                Self::attendance_verb(*list, *mark).replace(' ', ""),
                range.begin.date_naive(),
                range.end.date_naive()
            ),
            Self::Schedule => f.write_str("!schedule"),
            Self::Events => f.write_str("!events"),
            Self::Announce => f.write_str("!announce"),
        }
    }
}

/// Parse one chat message. Relative dates resolve against `now`.
pub fn parse(text: &str, now: &DateTime<Tz>) -> Result<Command> {
    let text = text.trim();
    if !text.starts_with(PREFIX) {
        return Err(RollcallError::MissingPrefix);
    }

    let fields: Vec<&str> = text.split_whitespace().collect();
    let (name, args) = fields
        .split_first()
        .ok_or(RollcallError::MissingPrefix)?;

    let attendance = |list, mark| -> Result<Command> {
        let range = flags_to_date_range(args, now).context("parse flags")?;
        Ok(Command::Attendance { list, mark, range })
    };

    match name.to_lowercase().as_str() {
        "!help" => Ok(Command::Help),
        "!setname" => {
            if args.is_empty() {
                return Err(RollcallError::Parse("!setname needs a name".to_owned()));
            }
            Ok(Command::SetName(args.join("-")))
        }
        "!out" => attendance(ListType::Absent, Mark::Add),
        "!in" => attendance(ListType::Absent, Mark::Remove),
        "!late" => attendance(ListType::Late, Mark::Add),
        "!ontime" => attendance(ListType::Late, Mark::Remove),
        "!schedule" => Ok(Command::Schedule),
        "!events" => Ok(Command::Events),
        "!announce" => Ok(Command::Announce),
        _ => Err(RollcallError::UnknownCommand((*name).to_owned())),
    }
}
