//! External calendar access.
//!
//! Sessions are explicit objects held in a per-application registry and handed
//! to the calendar source per request. Busy intervals are read from a CalDAV
//! `calendar-query` REPORT and converted to [`ExternalBusyInterval`] as soon as
//! they cross the boundary.

use crate::models::ExternalBusyInterval;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use dashmap::DashMap;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const CALENDAR_SESSION_HEADER: &str = "x-calendar-session";

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Calendar transport error: {0}")]
    Transport(String),

    #[error("Calendar returned status {0}")]
    Status(u16),

    #[error("Calendar request timed out")]
    Timeout,

    #[error("Calendar response could not be read: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for CalendarError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CalendarError::Timeout
        } else {
            CalendarError::Transport(err.to_string())
        }
    }
}

/// Credentials for one connected calendar, alive from connect to disconnect.
#[derive(Debug)]
pub struct CalendarSession {
    pub id: String,
    pub apple_id: String,
    pub app_password: Secret<String>,
    pub calendar_url: String,
    pub created_at: DateTime<Utc>,
}

/// Registry of live calendar sessions, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct CalendarSessions {
    sessions: Arc<DashMap<String, Arc<CalendarSession>>>,
}

impl CalendarSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        apple_id: String,
        app_password: Secret<String>,
        calendar_url: String,
    ) -> Arc<CalendarSession> {
        let session = Arc::new(CalendarSession {
            id: Uuid::new_v4().to_string(),
            apple_id,
            app_password,
            calendar_url,
            created_at: Utc::now(),
        });
        self.sessions.insert(session.id.clone(), session.clone());
        tracing::info!(session_id = %session.id, "Calendar session created");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<CalendarSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Returns whether a session was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Calendar session ended");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Best-effort source of third-party busy time.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn busy_intervals(
        &self,
        session: &CalendarSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalBusyInterval>, CalendarError>;
}

/// CalDAV client (iCloud and compatible servers).
#[derive(Clone)]
pub struct CalDavCalendar {
    client: Client,
    offset: FixedOffset,
}

impl CalDavCalendar {
    /// `offset` is applied to floating and all-day event times.
    pub fn new(timeout: Duration, offset: FixedOffset) -> Result<Self, CalendarError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::Transport(e.to_string()))?;
        Ok(Self { client, offset })
    }
}

#[async_trait]
impl CalendarSource for CalDavCalendar {
    #[tracing::instrument(skip(self, session), fields(session_id = %session.id))]
    async fn busy_intervals(
        &self,
        session: &CalendarSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalBusyInterval>, CalendarError> {
        let method =
            Method::from_bytes(b"REPORT").map_err(|e| CalendarError::Transport(e.to_string()))?;

        let response = self
            .client
            .request(method, &session.calendar_url)
            .basic_auth(&session.apple_id, Some(session.app_password.expose_secret()))
            .header("Depth", "1")
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/xml; charset=utf-8"),
            )
            .body(calendar_query(from, to))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Calendar query rejected");
            return Err(CalendarError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let intervals = extract_busy_intervals(&body, self.offset);
        tracing::debug!(count = intervals.len(), "Calendar busy intervals fetched");
        Ok(intervals)
    }
}

fn calendar_query(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <C:calendar-data/>
  </D:prop>
  <C:filter>
    <C:comp-filter name="VCALENDAR">
      <C:comp-filter name="VEVENT">
        <C:time-range start="{}" end="{}"/>
      </C:comp-filter>
    </C:comp-filter>
  </C:filter>
</C:calendar-query>"#,
        from.format("%Y%m%dT%H%M%SZ"),
        to.format("%Y%m%dT%H%M%SZ")
    )
}

/// Pull `VEVENT` start/end times out of a multistatus body (or bare iCalendar
/// text). Events without a readable start, or whose end precedes the start,
/// are skipped.
pub fn extract_busy_intervals(body: &str, offset: FixedOffset) -> Vec<ExternalBusyInterval> {
    let cleaned = body
        .replace("&#13;", "")
        .replace("<![CDATA[", "")
        .replace("]]>", "");

    let mut intervals = Vec::new();
    let mut in_event = false;
    let mut nested = 0usize;
    let mut start: Option<Result<DateTime<Utc>, String>> = None;
    let mut end: Option<Result<DateTime<Utc>, String>> = None;

    for line in unfold_lines(&cleaned) {
        let line = line.trim();
        if line.eq_ignore_ascii_case("BEGIN:VEVENT") {
            in_event = true;
            nested = 0;
            start = None;
            end = None;
            continue;
        }
        if !in_event {
            continue;
        }
        if line.eq_ignore_ascii_case("END:VEVENT") {
            in_event = false;
            if let Some(interval) = finish_event(start.take(), end.take()) {
                intervals.push(interval);
            }
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let mut params = name.split(';');
        let property = params.next().unwrap_or_default().to_ascii_uppercase();

        match property.as_str() {
            "BEGIN" => nested += 1,
            "END" => nested = nested.saturating_sub(1),
            "DTSTART" if nested == 0 => {
                start = Some(parse_ical_time(value, offset));
            }
            "DTEND" if nested == 0 => {
                end = Some(parse_ical_time(value, offset));
            }
            _ => {}
        }
    }

    intervals
}

fn finish_event(
    start: Option<Result<DateTime<Utc>, String>>,
    end: Option<Result<DateTime<Utc>, String>>,
) -> Option<ExternalBusyInterval> {
    let start = match start {
        Some(Ok(start)) => start,
        Some(Err(raw)) => {
            tracing::warn!(value = %raw, "Skipping calendar event with unreadable DTSTART");
            return None;
        }
        None => {
            tracing::warn!("Skipping calendar event without DTSTART");
            return None;
        }
    };

    let end = match end {
        Some(Ok(end)) if end < start => {
            tracing::warn!(%start, %end, "Skipping calendar event that ends before it starts");
            return None;
        }
        Some(Ok(end)) => Some(end),
        Some(Err(raw)) => {
            tracing::warn!(value = %raw, "Skipping calendar event with unreadable DTEND");
            return None;
        }
        None => None,
    };

    Some(ExternalBusyInterval { start, end })
}

/// Strip markup and join RFC 5545 continuation lines.
fn unfold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        let raw = raw.trim_end_matches('\r');
        let is_continuation = raw.starts_with(' ') || raw.starts_with('\t');
        let stripped = strip_tags(raw);

        if is_continuation && !raw.trim_start().starts_with('<') {
            if let Some(last) = lines.last_mut() {
                last.push_str(&stripped[1..]);
                continue;
            }
        }
        lines.push(stripped);
    }
    lines
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for ch in line.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// `20240304T150000Z` (UTC), `20240304T150000` (floating, business offset) or
/// `20240304` (all-day, local midnight).
fn parse_ical_time(value: &str, offset: FixedOffset) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    let invalid = || value.to_string();

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").map_err(|_| invalid())?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    let naive = if value.len() == 8 {
        NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|_| invalid())?
            .and_hms_opt(0, 0, 0)
            .ok_or_else(invalid)?
    } else {
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").map_err(|_| invalid())?
    };

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}
