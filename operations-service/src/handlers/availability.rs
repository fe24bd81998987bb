use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use service_core::error::AppError;

use super::calendar::session_from_headers;
use crate::{dtos::AvailabilityQuery, models::DayAvailability, AppState};

/// Slots for one day. The date defaults to today at the business offset.
pub async fn get_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<DayAvailability>, AppError> {
    let date = state.availability.resolve_date(query.date.as_deref())?;
    let session = session_from_headers(&state, &headers);

    let day = state
        .availability
        .day_availability(date, session.as_deref())
        .await?;

    Ok(Json(day))
}
