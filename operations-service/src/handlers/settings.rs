use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{
    dtos::{BusinessHoursResponse, UpdateBusinessHoursRequest},
    middleware::CallerContext,
    models::{BusinessHours, BusinessHoursSettings},
    AppState,
};

/// The stored weekday table, or the configured defaults when none is stored.
pub async fn get_business_hours(
    State(state): State<AppState>,
) -> Result<Json<BusinessHoursResponse>, AppError> {
    let response = match state.stores.scheduling.business_hours().await? {
        Some(settings) => BusinessHoursResponse {
            hours: settings.hours,
            updated_at: Some(settings.updated_at),
        },
        None => BusinessHoursResponse {
            hours: state.config.business.default_hours.clone(),
            updated_at: None,
        },
    };
    Ok(Json(response))
}

pub async fn put_business_hours(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<UpdateBusinessHoursRequest>,
) -> Result<Json<BusinessHoursResponse>, AppError> {
    caller.require_admin()?;

    let hours = BusinessHours::from_table(payload.hours).map_err(AppError::InvalidInput)?;
    let settings = BusinessHoursSettings::new(hours.into_table());
    state
        .stores
        .scheduling
        .save_business_hours(&settings)
        .await?;

    tracing::info!(updated_by = %caller.user_id, "Business hours replaced");

    Ok(Json(BusinessHoursResponse {
        hours: settings.hours,
        updated_at: Some(settings.updated_at),
    }))
}
