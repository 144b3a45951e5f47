//! Calendar math: day and week boundaries, weekday mapping, and range walks.
//!
//! Every boundary is computed from local calendar fields in the time zone of
//! the value passed in, never by adding fixed 24 hour durations, so weeks
//! that contain a DST transition are 167 or 169 hours long. Weeks start on
//! Sunday (weekday index 0).

use chrono::{
    DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Weekday,
};

use crate::error::{Result, ResultExt, RollcallError};

/// Longest span [`for_each_period`] will walk.
pub const MAX_RANGE_DAYS: i64 = 365;

/// Inclusive range of instants; `end` is the last nanosecond it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange<Tz: TimeZone> {
    pub begin: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl<Tz: TimeZone> DateRange<Tz> {
    pub fn new(begin: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        Self { begin, end }
    }

    /// The whole calendar day containing `t`.
    pub fn day_of(t: &DateTime<Tz>) -> Self {
        Self::new(beginning_of_day(t), end_of_day(t))
    }

    /// The whole Sunday-to-Saturday week containing `t`.
    pub fn week_of(t: &DateTime<Tz>) -> Self {
        Self::new(beginning_of_week(t), end_of_week(t))
    }

    /// Whether `t` lies within the range, both ends included.
    pub fn contains<Other: TimeZone>(&self, t: &DateTime<Other>) -> bool {
        *t >= self.begin && *t <= self.end
    }
}

/// Resolve a local wall-clock time to an instant.
///
/// Ambiguous times (clocks going back) take the earlier instant; times
/// skipped by clocks going forward move to the first valid instant after the
/// gap.
fn localize<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    if let Some(t) = tz.from_local_datetime(&naive).earliest() {
        return t;
    }
    let mut candidate = naive;
    for _ in 0..8 {
        candidate += TimeDelta::minutes(15);
        if let Some(t) = tz.from_local_datetime(&candidate).earliest() {
            return t;
        }
    }
    tz.from_utc_datetime(&naive)
}

fn midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    localize(tz, date.and_time(NaiveTime::MIN))
}

fn shift_date(date: NaiveDate, days: i64) -> NaiveDate {
    let magnitude = Days::new(days.unsigned_abs());
    let shifted = if days >= 0 {
        date.checked_add_days(magnitude)
    } else {
        date.checked_sub_days(magnitude)
    };
    shifted.unwrap_or(date)
}

/// Index of `weekday` with Sunday as 0 and Saturday as 6.
pub fn weekday_index(weekday: Weekday) -> u8 {
    // num_days_from_sunday is always in 0..=6
    weekday.num_days_from_sunday() as u8
}

/// Weekday for a Sunday-based index, `None` outside 0-6.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// 00:00:00 of the calendar day containing `t`.
pub fn beginning_of_day<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Tz> {
    midnight(&t.timezone(), t.date_naive())
}

/// Last nanosecond of the calendar day containing `t`.
pub fn end_of_day<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Tz> {
    midnight(&t.timezone(), shift_date(t.date_naive(), 1)) - TimeDelta::nanoseconds(1)
}

/// 00:00:00 on the Sunday of the week containing `t`.
pub fn beginning_of_week<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Tz> {
    let date = t.date_naive();
    let offset = i64::from(date.weekday().num_days_from_sunday());
    midnight(&t.timezone(), shift_date(date, -offset))
}

/// Last nanosecond of the Saturday of the week containing `t`.
pub fn end_of_week<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Tz> {
    let date = t.date_naive();
    let offset = 7 - i64::from(date.weekday().num_days_from_sunday());
    midnight(&t.timezone(), shift_date(date, offset)) - TimeDelta::nanoseconds(1)
}

/// Same week and time of day as `t`, moved to `weekday`.
pub fn day_of_week<Tz: TimeZone>(t: &DateTime<Tz>, weekday: Weekday) -> DateTime<Tz> {
    let date = t.date_naive();
    let sunday = shift_date(date, -i64::from(date.weekday().num_days_from_sunday()));
    let target = shift_date(sunday, i64::from(weekday.num_days_from_sunday()));
    localize(&t.timezone(), target.and_time(t.time()))
}

/// `t` moved by whole calendar days, keeping its wall-clock time.
pub fn add_days<Tz: TimeZone>(t: &DateTime<Tz>, days: i64) -> DateTime<Tz> {
    localize(
        &t.timezone(),
        shift_date(t.date_naive(), days).and_time(t.time()),
    )
}

/// Walk `range` in steps of `step_days` calendar days (at least one), calling
/// `f` with each step while it is before `range.end`. Stops at the first error.
pub fn for_each_period<Tz, F>(range: &DateRange<Tz>, step_days: i64, mut f: F) -> Result<()>
where
    Tz: TimeZone,
    F: FnMut(DateTime<Tz>) -> Result<()>,
{
    if range.end.clone() - range.begin.clone() > TimeDelta::days(MAX_RANGE_DAYS) {
        return Err(RollcallError::RangeTooLarge);
    }
    let step_days = step_days.max(1);
    let mut next = range.begin.clone();
    while next < range.end {
        let label = next.naive_local().to_string();
        f(next.clone()).with_context(|| format!("apply function for date {label}"))?;
        next = add_days(&next, step_days);
    }
    Ok(())
}

/// Call `f` once for every day in `range`.
pub fn for_each_day<Tz, F>(range: &DateRange<Tz>, f: F) -> Result<()>
where
    Tz: TimeZone,
    F: FnMut(DateTime<Tz>) -> Result<()>,
{
    for_each_period(range, 1, f)
}

/// Call `f` once for every 7 day step in `range`.
pub fn for_each_week<Tz, F>(range: &DateRange<Tz>, f: F) -> Result<()>
where
    Tz: TimeZone,
    F: FnMut(DateTime<Tz>) -> Result<()>,
{
    for_each_period(range, 7, f)
}

const DATED_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%Y", "%m.%d.%Y", "%m-%d-%Y", "%b %d %Y", "%B %d %Y", "%b %d, %Y",
    "%B %d, %Y", "%d %b %Y", "%d %B %Y",
];

const YEARLESS_FORMATS: &[&str] = &[
    "%m/%d %Y", "%m.%d %Y", "%m-%d %Y", "%b %d %Y", "%B %d %Y", "%d %b %Y", "%d %B %Y",
];

/// Parse a loose date like `12/20`, `dec 20` or `dec 20 2010`.
///
/// Yearless dates take `now`'s year, rolling into the next year when the
/// month has already passed.
pub fn parse_date<Tz: TimeZone>(input: &str, now: &DateTime<Tz>) -> Result<NaiveDate> {
    let text = input.trim().to_lowercase();

    for format in DATED_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return Ok(date);
        }
    }

    let today = now.date_naive();
    for format in YEARLESS_FORMATS {
        let candidate = format!("{text} {}", today.year());
        if let Ok(date) = NaiveDate::parse_from_str(&candidate, format) {
            if date.month() < today.month() {
                return date
                    .with_year(today.year() + 1)
                    .ok_or_else(|| RollcallError::Parse(input.to_owned()));
            }
            return Ok(date);
        }
    }

    Err(RollcallError::Parse(input.to_owned()))
}

/// Build a range from command flags.
///
/// - `[]`: the week containing `now`.
/// - `["12/20"]` (or a date split over several words): that whole day.
/// - `["12/20", "to", "12/21"]`: start of the first day to end of the last.
pub fn flags_to_date_range<Tz: TimeZone>(
    flags: &[&str],
    now: &DateTime<Tz>,
) -> Result<DateRange<Tz>> {
    if flags.is_empty() {
        return Ok(DateRange::week_of(now));
    }

    let tz = now.timezone();
    let to_idx = flags.iter().rposition(|f| f.eq_ignore_ascii_case("to"));

    let Some(to_idx) = to_idx else {
        let date = parse_date(&flags.join(" "), now)?;
        let day = midnight(&tz, date);
        return Ok(DateRange::day_of(&day));
    };

    let begin = parse_date(&flags[..to_idx].join(" "), now)?;
    let end = parse_date(&flags[to_idx + 1..].join(" "), now)?;
    Ok(DateRange::new(
        midnight(&tz, begin),
        end_of_day(&midnight(&tz, end)),
    ))
}
