//! Date and duration literals accepted in course configuration.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Naive formats tried after RFC 3339, most specific first.
const NAIVE_FORMATS: &[&str] = &[
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M",
];

pub const DATE_FORMATS_HELP: &str =
  "RFC 3339, YYYY-MM-DDTHH:MM:SS, YYYY-MM-DD HH:MM:SS, YYYY-MM-DDTHH:MM, YYYY-MM-DD HH:MM or YYYY-MM-DD";

pub const DURATION_FORMAT_HELP: &str = "<integer>(y|m|w|d|h), e.g. 3d";

/// Parse a configuration date. Values without an offset are taken as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
  let raw = raw.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt);
  }
  let utc = FixedOffset::east_opt(0)?;
  for format in NAIVE_FORMATS {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
      return utc.from_local_datetime(&naive).single();
    }
  }
  let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
  utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

/// A point in time from course configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CourseDate(pub DateTime<FixedOffset>);

impl CourseDate {
  pub fn to_utc(&self) -> DateTime<Utc> {
    self.0.with_timezone(&Utc)
  }
}

impl Serialize for CourseDate {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.0.to_rfc3339())
  }
}

impl<'de> Deserialize<'de> for CourseDate {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw)
      .map(CourseDate)
      .ok_or_else(|| serde::de::Error::custom(format!("invalid date {raw:?}, expected {DATE_FORMATS_HELP}")))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
  Years,
  Months,
  Weeks,
  Days,
  Hours,
}

/// `<integer>(y|m|w|d|h)`, e.g. `3d`. Months and years stay calendar units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleDuration {
  pub amount: i64,
  pub unit: DurationUnit,
}

impl SimpleDuration {
  pub fn parse(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    let (last, _) = raw.char_indices().last()?;
    let (amount, unit) = raw.split_at(last);
    let unit = match unit {
      "y" => DurationUnit::Years,
      "m" => DurationUnit::Months,
      "w" => DurationUnit::Weeks,
      "d" => DurationUnit::Days,
      "h" => DurationUnit::Hours,
      _ => return None,
    };
    Some(Self {
      amount: amount.parse().ok()?,
      unit,
    })
  }
}

impl fmt::Display for SimpleDuration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let unit = match self.unit {
      DurationUnit::Years => "y",
      DurationUnit::Months => "m",
      DurationUnit::Weeks => "w",
      DurationUnit::Days => "d",
      DurationUnit::Hours => "h",
    };
    write!(f, "{}{}", self.amount, unit)
  }
}

impl Serialize for SimpleDuration {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for SimpleDuration {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    SimpleDuration::parse(&raw)
      .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}, expected {DURATION_FORMAT_HELP}")))
  }
}
