//! Meeting booking on top of the availability rules.

use super::availability::{local_midnight, overlaps_busy, AvailabilityCalculator};
use super::calendar::CalendarSession;
use super::store::SchedulingStore;
use crate::models::{Meeting, MeetingStatus};
use chrono::{DateTime, Datelike, Duration, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct BookingService {
    store: Arc<dyn SchedulingStore>,
    availability: Arc<AvailabilityCalculator>,
    /// Serialises the check-then-insert of bookings within this process.
    booking_lock: Mutex<()>,
}

impl BookingService {
    pub fn new(store: Arc<dyn SchedulingStore>, availability: Arc<AvailabilityCalculator>) -> Self {
        Self {
            store,
            availability,
            booking_lock: Mutex::new(()),
        }
    }

    /// All meetings, or one client's.
    pub async fn list_meetings(&self, client_id: Option<&str>) -> Result<Vec<Meeting>, AppError> {
        let meetings = self.store.list_meetings().await?;
        Ok(match client_id {
            Some(client_id) => meetings
                .into_iter()
                .filter(|m| m.client_id == client_id)
                .collect(),
            None => meetings,
        })
    }

    /// Book `[start, end)` for a client. The window must fall inside one
    /// day's business hours and must not overlap a scheduled meeting or the
    /// caller's external busy time.
    #[tracing::instrument(skip(self, title, session), fields(client_id = %client_id))]
    pub async fn book_meeting(
        &self,
        client_id: &str,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        session: Option<&CalendarSession>,
    ) -> Result<Meeting, AppError> {
        if start >= end {
            return Err(AppError::InvalidInput(
                "meeting start must be before its end".to_string(),
            ));
        }

        let offset = self.availability.offset();
        let local_start = start.with_timezone(&offset);
        let date = local_start.date_naive();

        let hours = self.availability.business_hours().await?;
        let window = hours.window_for(date.weekday()).ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!("business is closed on {}", date))
        })?;
        let midnight = local_midnight(date, offset).ok_or_else(|| {
            AppError::InvalidInput(format!("cannot resolve local midnight for {}", date))
        })?;
        let open_at = midnight + Duration::minutes(i64::from(window.open_minutes));
        let close_at = midnight + Duration::minutes(i64::from(window.close_minutes));
        if start < open_at || end > close_at {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "requested time is outside business hours"
            )));
        }

        let (externals, _) = self.availability.external_busy(date, session).await;

        let _guard = self.booking_lock.lock().await;
        let meetings = self.store.list_meetings().await?;
        if overlaps_busy(start, end, &meetings, &externals) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "requested time is not available"
            )));
        }

        let meeting = Meeting::new(client_id.to_string(), title.to_string(), start, end);
        self.store.insert_meeting(&meeting).await?;
        tracing::info!(meeting_id = %meeting.id, start = %meeting.start, "Meeting booked");
        Ok(meeting)
    }

    /// Cancel a meeting. `requester` is `None` for admins; clients may only
    /// cancel their own meetings.
    pub async fn cancel_meeting(
        &self,
        id: &str,
        requester: Option<&str>,
    ) -> Result<Meeting, AppError> {
        let meeting = self
            .store
            .get_meeting(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("meeting {} not found", id)))?;

        if let Some(requester) = requester {
            if meeting.client_id != requester {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "meeting belongs to another client"
                )));
            }
        }
        if meeting.status == MeetingStatus::Cancelled {
            return Ok(meeting);
        }

        let updated = self
            .store
            .update_meeting_status(id, MeetingStatus::Cancelled)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("meeting {} not found", id)))?;
        tracing::info!(meeting_id = %id, "Meeting cancelled");
        Ok(updated)
    }
}
