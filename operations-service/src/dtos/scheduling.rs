use crate::models::{
    BusinessHoursTable, Meeting, MeetingStatus, ServiceRequest, ServiceRequestStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
}

/// The app password stays a plain string only until the handler wraps it.
#[derive(Deserialize, Validate)]
pub struct CreateCalendarSessionRequest {
    #[validate(length(min = 1, message = "Apple ID is required"))]
    pub apple_id: String,

    #[validate(custom(function = "password_present"))]
    pub app_password: String,

    #[validate(url(message = "Calendar URL must be a valid URL"))]
    pub calendar_url: String,
}

impl fmt::Debug for CreateCalendarSessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateCalendarSessionRequest")
            .field("apple_id", &self.apple_id)
            .field("app_password", &"[REDACTED]")
            .field("calendar_url", &self.calendar_url)
            .finish()
    }
}

fn password_present(password: &str) -> Result<(), ValidationError> {
    if password.trim().is_empty() {
        return Err(ValidationError::new("app_password_required"));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct CalendarSessionResponse {
    pub session_id: String,
    pub apple_id: String,
    pub calendar_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BookMeetingRequest {
    /// Admins book on behalf of a client; ignored for clients.
    pub client_id: Option<String>,

    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MeetingResponse {
    pub id: String,
    pub client_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: MeetingStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Meeting> for MeetingResponse {
    fn from(meeting: Meeting) -> Self {
        Self {
            id: meeting.id,
            client_id: meeting.client_id,
            title: meeting.title,
            start: meeting.start,
            end: meeting.end,
            status: meeting.status,
            created_at: meeting.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BusinessHoursResponse {
    pub hours: BusinessHoursTable,
    /// `None` while the configured defaults are in effect.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Replacement weekday table. Keys must be weekday names; values are kept
/// verbatim and parsed when availability is computed.
#[derive(Debug, Deserialize)]
pub struct UpdateBusinessHoursRequest {
    pub hours: BusinessHoursTable,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateServiceRequestRequest {
    /// Admins file on behalf of a client; ignored for clients.
    pub client_id: Option<String>,

    #[validate(length(min = 1, max = 2000, message = "Description must be 1-2000 characters"))]
    pub description: String,

    pub preferred_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceRequestQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequestStatusRequest {
    pub status: ServiceRequestStatus,
}

#[derive(Debug, Serialize)]
pub struct ServiceRequestResponse {
    pub id: String,
    pub client_id: String,
    pub description: String,
    pub preferred_date: Option<NaiveDate>,
    pub status: ServiceRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServiceRequest> for ServiceRequestResponse {
    fn from(request: ServiceRequest) -> Self {
        Self {
            id: request.id,
            client_id: request.client_id,
            description: request.description,
            preferred_date: request.preferred_date,
            status: request.status,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}
