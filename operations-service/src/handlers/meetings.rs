use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use service_core::error::AppError;

use super::calendar::session_from_headers;
use crate::{
    dtos::{BookMeetingRequest, MeetingResponse},
    middleware::{CallerContext, ValidatedJson},
    AppState,
};

/// Admins see every meeting, clients their own.
pub async fn list_meetings(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<Json<Vec<MeetingResponse>>, AppError> {
    let meetings = state.booking.list_meetings(caller.client_scope()).await?;
    Ok(Json(meetings.into_iter().map(MeetingResponse::from).collect()))
}

pub async fn book_meeting(
    State(state): State<AppState>,
    caller: CallerContext,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<BookMeetingRequest>,
) -> Result<(StatusCode, Json<MeetingResponse>), AppError> {
    let client_id = match (caller.is_admin(), payload.client_id.as_deref()) {
        (true, Some(client_id)) => client_id.to_string(),
        (true, None) => {
            return Err(AppError::InvalidInput(
                "client_id is required when booking on behalf of a client".to_string(),
            ))
        }
        (false, _) => caller.user_id.clone(),
    };
    let session = session_from_headers(&state, &headers);

    tracing::info!(
        client_id = %client_id,
        start = %payload.start,
        end = %payload.end,
        "Booking meeting"
    );

    let meeting = state
        .booking
        .book_meeting(
            &client_id,
            &payload.title,
            payload.start,
            payload.end,
            session.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(MeetingResponse::from(meeting))))
}

pub async fn cancel_meeting(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(meeting_id): Path<String>,
) -> Result<Json<MeetingResponse>, AppError> {
    let meeting = state
        .booking
        .cancel_meeting(&meeting_id, caller.client_scope())
        .await?;
    Ok(Json(MeetingResponse::from(meeting)))
}
