//! Business-hours table and the time-of-day grammar it is written in.
//!
//! Hours are stored as free text per weekday (`"9am-5pm"`, `"09:00-17:30"`,
//! `"closed"`) and parsed on read. A weekday that is missing or does not parse
//! simply has no opening window.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw weekday name → hours string, as stored and edited by admins.
pub type BusinessHoursTable = BTreeMap<String, String>;

pub const WEEKDAY_KEYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

pub fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Open and close as minute offsets from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningWindow {
    pub open_minutes: u32,
    pub close_minutes: u32,
}

/// Weekday table validated against the known weekday names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusinessHours {
    table: BusinessHoursTable,
}

impl BusinessHours {
    /// Normalise keys to lowercase and reject anything that is not a weekday.
    pub fn from_table(table: BusinessHoursTable) -> Result<Self, String> {
        let mut normalised = BusinessHoursTable::new();
        for (day, hours) in table {
            let key = day.trim().to_ascii_lowercase();
            if !WEEKDAY_KEYS.contains(&key.as_str()) {
                return Err(format!("unknown weekday '{}'", day));
            }
            normalised.insert(key, hours);
        }
        Ok(Self { table: normalised })
    }

    /// Monday to Friday 9am-5pm, weekends closed.
    pub fn standard_week() -> Self {
        let table = WEEKDAY_KEYS
            .iter()
            .map(|day| {
                let hours = match *day {
                    "saturday" | "sunday" => "closed",
                    _ => "9am-5pm",
                };
                (day.to_string(), hours.to_string())
            })
            .collect();
        Self { table }
    }

    pub fn table(&self) -> &BusinessHoursTable {
        &self.table
    }

    pub fn into_table(self) -> BusinessHoursTable {
        self.table
    }

    /// Raw hours string configured for the weekday, if any.
    pub fn raw_for(&self, day: Weekday) -> Option<&str> {
        self.table.get(weekday_key(day)).map(String::as_str)
    }

    /// Parsed opening window. `None` when absent, closed or malformed.
    pub fn window_for(&self, day: Weekday) -> Option<OpeningWindow> {
        self.raw_for(day).and_then(parse_hours_range)
    }
}

/// Persisted settings document holding the business-hours table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursSettings {
    #[serde(rename = "_id")]
    pub id: String,
    pub hours: BusinessHoursTable,
    pub updated_at: DateTime<Utc>,
}

impl BusinessHoursSettings {
    pub const DOCUMENT_ID: &'static str = "business_hours";

    pub fn new(hours: BusinessHoursTable) -> Self {
        Self {
            id: Self::DOCUMENT_ID.to_string(),
            hours,
            updated_at: Utc::now(),
        }
    }
}

/// Parse `"<open>-<close>"`. Anything other than exactly two parts is malformed.
pub fn parse_hours_range(raw: &str) -> Option<OpeningWindow> {
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 2 {
        return None;
    }

    Some(OpeningWindow {
        open_minutes: parse_time_of_day(parts[0])?,
        close_minutes: parse_time_of_day(parts[1])?,
    })
}

/// Minutes after midnight for `"9am"`, `"5:30pm"`, `"12am"` or `"09:00"`.
pub fn parse_time_of_day(raw: &str) -> Option<u32> {
    let value = raw.trim().to_ascii_lowercase();

    if let Some(body) = value.strip_suffix("am") {
        let (hour, minute) = parse_twelve_hour(body)?;
        return Some((hour % 12) * 60 + minute);
    }
    if let Some(body) = value.strip_suffix("pm") {
        let (hour, minute) = parse_twelve_hour(body)?;
        return Some((hour % 12 + 12) * 60 + minute);
    }

    let (hour, minute) = value.split_once(':')?;
    let hour = parse_digits(hour, 1, 2)?;
    let minute = parse_digits(minute, 2, 2)?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

fn parse_twelve_hour(body: &str) -> Option<(u32, u32)> {
    let body = body.trim();
    let (hour, minute) = match body.split_once(':') {
        Some((h, m)) => (parse_digits(h, 1, 2)?, parse_digits(m, 2, 2)?),
        None => (parse_digits(body, 1, 2)?, 0),
    };
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn parse_digits(raw: &str, min_len: usize, max_len: usize) -> Option<u32> {
    if raw.len() < min_len || raw.len() > max_len || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
