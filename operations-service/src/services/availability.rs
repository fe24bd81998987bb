//! Appointment availability.
//!
//! A day is tiled into fixed-length slots between its opening and closing
//! time. A slot is unavailable when it overlaps a scheduled meeting or a busy
//! interval from the external calendar. The external calendar is best effort:
//! when it fails or times out the day is computed from internal meetings only.

use super::calendar::{CalendarSession, CalendarSource};
use super::metrics::record_availability_request;
use super::store::SchedulingStore;
use crate::models::{
    BusinessHours, DayAvailability, ExternalBusyInterval, Meeting, OpeningWindow, TimeSlot,
};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AvailabilitySettings {
    pub slot_minutes: u32,
    /// Offset at which business hours are interpreted.
    pub offset: FixedOffset,
    pub calendar_timeout: std::time::Duration,
    /// Used until an admin stores a table of their own.
    pub default_hours: BusinessHours,
}

/// How the external calendar contributed to a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarOutcome {
    Ok,
    Degraded,
    Skipped,
}

impl CalendarOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarOutcome::Ok => "ok",
            CalendarOutcome::Degraded => "degraded",
            CalendarOutcome::Skipped => "skipped",
        }
    }
}

pub struct AvailabilityCalculator {
    store: Arc<dyn SchedulingStore>,
    calendar: Arc<dyn CalendarSource>,
    settings: AvailabilitySettings,
}

impl AvailabilityCalculator {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        calendar: Arc<dyn CalendarSource>,
        settings: AvailabilitySettings,
    ) -> Self {
        Self {
            store,
            calendar,
            settings,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.settings.offset
    }

    /// Today's date at the business offset.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.settings.offset).date_naive()
    }

    /// Parse an optional `YYYY-MM-DD` query value, defaulting to today.
    pub fn resolve_date(&self, raw: Option<&str>) -> Result<NaiveDate, AppError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(self.today()),
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| AppError::InvalidInput(format!("invalid date '{}'", raw))),
        }
    }

    /// The stored business-hours table, or the configured default.
    pub async fn business_hours(&self) -> Result<BusinessHours, AppError> {
        let Some(settings) = self.store.business_hours().await? else {
            return Ok(self.settings.default_hours.clone());
        };

        match BusinessHours::from_table(settings.hours) {
            Ok(hours) => Ok(hours),
            Err(e) => {
                tracing::warn!(error = %e, "Stored business hours unreadable, treating every day as closed");
                Ok(BusinessHours::default())
            }
        }
    }

    #[tracing::instrument(skip(self, session), fields(date = %date))]
    pub async fn day_availability(
        &self,
        date: NaiveDate,
        session: Option<&CalendarSession>,
    ) -> Result<DayAvailability, AppError> {
        let hours = self.business_hours().await?;
        let window = hours.window_for(date.weekday());
        if window.is_none() {
            tracing::debug!(raw = ?hours.raw_for(date.weekday()), "No usable hours for date");
        }

        let meetings = self.store.list_meetings().await?;
        let (externals, outcome) = self.external_busy(date, session).await;
        record_availability_request(outcome.as_str());

        Ok(compute_slots(
            date,
            window,
            self.settings.slot_minutes,
            self.settings.offset,
            &meetings,
            &externals,
        ))
    }

    /// Busy intervals for the local day from the caller's calendar. Never
    /// fails: errors and timeouts degrade to an empty list.
    pub async fn external_busy(
        &self,
        date: NaiveDate,
        session: Option<&CalendarSession>,
    ) -> (Vec<ExternalBusyInterval>, CalendarOutcome) {
        let Some(session) = session else {
            return (Vec::new(), CalendarOutcome::Skipped);
        };
        let Some(from) = local_midnight(date, self.settings.offset) else {
            return (Vec::new(), CalendarOutcome::Skipped);
        };
        let from = from.with_timezone(&Utc);
        let to = from + Duration::days(1);

        let fetch = self.calendar.busy_intervals(session, from, to);
        match tokio::time::timeout(self.settings.calendar_timeout, fetch).await {
            Ok(Ok(intervals)) => (intervals, CalendarOutcome::Ok),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, session_id = %session.id, "External calendar unavailable, using internal bookings only");
                (Vec::new(), CalendarOutcome::Degraded)
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session.id,
                    timeout_ms = self.settings.calendar_timeout.as_millis() as u64,
                    "External calendar timed out, using internal bookings only"
                );
                (Vec::new(), CalendarOutcome::Degraded)
            }
        }
    }
}

pub fn local_midnight(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    offset
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()
}

/// Tile the opening window into slots and flag each against the busy data.
/// A final slot ending exactly at close is included.
pub fn compute_slots(
    date: NaiveDate,
    window: Option<OpeningWindow>,
    slot_minutes: u32,
    offset: FixedOffset,
    meetings: &[Meeting],
    externals: &[ExternalBusyInterval],
) -> DayAvailability {
    let Some(window) = window else {
        return DayAvailability::closed(date);
    };
    let Some(midnight) = local_midnight(date, offset) else {
        return DayAvailability::closed(date);
    };

    let slot_minutes = slot_minutes.max(1);
    let mut slots = Vec::new();
    let mut cursor = window.open_minutes;
    while cursor + slot_minutes <= window.close_minutes {
        let start = midnight + Duration::minutes(i64::from(cursor));
        let end = start + Duration::minutes(i64::from(slot_minutes));
        let busy = overlaps_busy(
            start.with_timezone(&Utc),
            end.with_timezone(&Utc),
            meetings,
            externals,
        );
        slots.push(TimeSlot {
            start,
            end,
            available: !busy,
        });
        cursor += slot_minutes;
    }

    DayAvailability {
        date,
        slots,
        open_minutes: Some(window.open_minutes),
        close_minutes: Some(window.close_minutes),
    }
}

/// Half-open overlap against scheduled meetings and external intervals.
pub fn overlaps_busy(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    meetings: &[Meeting],
    externals: &[ExternalBusyInterval],
) -> bool {
    let meeting_clash = meetings
        .iter()
        .filter(|m| m.blocks_availability())
        .any(|m| start < m.end && end > m.start);

    meeting_clash
        || externals
            .iter()
            .any(|e| start < e.effective_end() && end > e.start)
}
