//! Calendar session lifecycle.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use secrecy::Secret;
use service_core::error::AppError;
use std::sync::Arc;

use crate::{
    dtos::{CalendarSessionResponse, CreateCalendarSessionRequest},
    middleware::{CallerContext, ValidatedJson},
    services::{CalendarSession, CALENDAR_SESSION_HEADER},
    AppState,
};

/// Session named by the `X-Calendar-Session` header, if it is still live.
/// An unknown id is ignored so availability falls back to internal bookings.
pub(crate) fn session_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Option<Arc<CalendarSession>> {
    let id = headers
        .get(CALENDAR_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())?;

    let session = state.calendar_sessions.get(id);
    if session.is_none() {
        tracing::warn!(session_id = %id, "Unknown calendar session, ignoring");
    }
    session
}

pub async fn create_session(
    State(state): State<AppState>,
    caller: CallerContext,
    ValidatedJson(payload): ValidatedJson<CreateCalendarSessionRequest>,
) -> Result<(StatusCode, Json<CalendarSessionResponse>), AppError> {
    caller.require_admin()?;

    let session = state.calendar_sessions.create(
        payload.apple_id,
        Secret::new(payload.app_password),
        payload.calendar_url,
    );

    Ok((
        StatusCode::CREATED,
        Json(CalendarSessionResponse {
            session_id: session.id.clone(),
            apple_id: session.apple_id.clone(),
            calendar_url: session.calendar_url.clone(),
            created_at: session.created_at,
        }),
    ))
}

pub async fn end_session(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    caller.require_admin()?;

    if state.calendar_sessions.remove(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(anyhow::anyhow!(
            "Calendar session not found"
        )))
    }
}
