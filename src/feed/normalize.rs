use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc, Weekday};
use serde::Serialize;
use thiserror::Error;

use super::parser::RawItem;
use crate::util::strip_control_chars;

/// A feed item after cleanup, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// The publication date matched none of the supported layouts.
///
/// Not fatal: the item is kept with no publication time.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized publication date: {0:?}")]
pub struct DateParseError(pub String);

/// Clean up a raw item: control sequences stripped, whitespace trimmed and
/// the publication date converted to UTC.
///
/// Text in a [`RawItem`] is already entity-decoded by the fetcher and is
/// not decoded again, so a literal `&amp;` in a title survives.
pub fn normalize(raw: &RawItem) -> FeedItem {
    let published_at = raw
        .pub_date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| match parse_pub_date(s) {
            Ok(at) => Some(at),
            Err(e) => {
                tracing::warn!(link = %raw.link, error = %e, "Dropping publication date");
                None
            }
        });

    FeedItem {
        title: tidy(&raw.title),
        link: raw.link.trim().to_string(),
        description: tidy(&raw.description),
        published_at,
    }
}

fn tidy(s: &str) -> String {
    strip_control_chars(s).trim().to_string()
}

impl From<&FeedItem> for RawItem {
    fn from(item: &FeedItem) -> Self {
        RawItem {
            title: item.title.clone(),
            link: item.link.clone(),
            description: item.description.clone(),
            pub_date: item
                .published_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// Date layouts seen in the wild, most common first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Rfc1123Z,
    Rfc1123,
    Rfc822Z,
    Rfc822,
    Rfc3339,
    UnixDate,
    DateTime,
}

const LAYOUTS: [Layout; 7] = [
    Layout::Rfc1123Z,
    Layout::Rfc1123,
    Layout::Rfc822Z,
    Layout::Rfc822,
    Layout::Rfc3339,
    Layout::UnixDate,
    Layout::DateTime,
];

impl Layout {
    /// A sample of the layout; its length picks the first layouts to try.
    fn sample(self) -> &'static str {
        match self {
            Layout::Rfc1123Z => "Mon, 02 Jan 2006 15:04:05 -0700",
            Layout::Rfc1123 => "Mon, 02 Jan 2006 15:04:05 MST",
            Layout::Rfc822Z => "02 Jan 06 15:04 -0700",
            Layout::Rfc822 => "02 Jan 06 15:04 MST",
            Layout::Rfc3339 => "2006-01-02T15:04:05Z07:00",
            Layout::UnixDate => "Mon Jan _2 15:04:05 MST 2006",
            Layout::DateTime => "2006-01-02 15:04:05",
        }
    }

    fn parse(self, s: &str) -> Option<DateTime<Utc>> {
        match self {
            Layout::Rfc1123Z => with_numeric_zone(skip_weekday(s)?, "%d %b %Y %H:%M:%S %z"),
            Layout::Rfc1123 => with_zone_name(skip_weekday(s)?, "%d %b %Y %H:%M:%S"),
            Layout::Rfc822Z => with_numeric_zone(s, "%d %b %y %H:%M %z"),
            Layout::Rfc822 => with_zone_name(s, "%d %b %y %H:%M"),
            Layout::Rfc3339 => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Layout::UnixDate => unix_date(s),
            Layout::DateTime => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc()),
        }
    }
}

/// Parse a feed publication date into UTC.
///
/// Layouts whose sample has the same length as the input are tried first,
/// then the remaining ones in order. Naive timestamps are read as UTC.
pub fn parse_pub_date(s: &str) -> Result<DateTime<Utc>, DateParseError> {
    let s = s.trim();
    let len = s.len();

    LAYOUTS
        .iter()
        .filter(|layout| layout.sample().len() == len)
        .chain(LAYOUTS.iter().filter(|layout| layout.sample().len() != len))
        .find_map(|layout| layout.parse(s))
        .ok_or_else(|| DateParseError(s.to_string()))
}

/// Drop a leading "Mon, ". The name must be a weekday but need not match
/// the date; plenty of feeds get it wrong.
fn skip_weekday(s: &str) -> Option<&str> {
    let (name, rest) = s.split_once(", ")?;
    name.parse::<Weekday>().ok()?;
    Some(rest)
}

fn with_numeric_zone(s: &str, fmt: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, fmt)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn with_zone_name(s: &str, fmt: &str) -> Option<DateTime<Utc>> {
    let (rest, zone) = s.rsplit_once(' ')?;
    let naive = NaiveDateTime::parse_from_str(rest, fmt).ok()?;
    in_zone(naive, zone)
}

// "Mon Jan  2 15:04:05 MST 2006"; the day may be space padded
fn unix_date(s: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    let [weekday, month, day, time, zone, year] = parts.as_slice() else {
        return None;
    };
    weekday.parse::<Weekday>().ok()?;
    let naive = NaiveDateTime::parse_from_str(
        &format!("{month} {day} {time} {year}"),
        "%b %d %H:%M:%S %Y",
    )
    .ok()?;
    in_zone(naive, zone)
}

fn in_zone(naive: NaiveDateTime, zone: &str) -> Option<DateTime<Utc>> {
    zone_offset(zone)?
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Offsets for the zone abbreviations RFC 822 names.
fn zone_offset(abbr: &str) -> Option<FixedOffset> {
    let hours = match abbr.to_ascii_uppercase().as_str() {
        "UT" | "UTC" | "GMT" | "Z" => 0,
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        _ => return None,
    };
    FixedOffset::east_opt(hours * 3600)
}
