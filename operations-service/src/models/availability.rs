//! Availability output and the external busy intervals that feed it.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A fixed-length candidate appointment window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub available: bool,
}

/// Slots for one calendar day. Open/close are `None` when the day has no
/// usable hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub slots: Vec<TimeSlot>,
    pub open_minutes: Option<u32>,
    pub close_minutes: Option<u32>,
}

impl DayAvailability {
    pub fn closed(date: NaiveDate) -> Self {
        Self {
            date,
            slots: Vec::new(),
            open_minutes: None,
            close_minutes: None,
        }
    }
}

/// Busy range reported by a third-party calendar. A missing end means the
/// event is zero-width at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalBusyInterval {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl ExternalBusyInterval {
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end.unwrap_or(self.start)
    }
}
