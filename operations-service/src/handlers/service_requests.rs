use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        CreateServiceRequestRequest, ServiceRequestQuery, ServiceRequestResponse,
        UpdateServiceRequestStatusRequest,
    },
    middleware::{CallerContext, ValidatedJson},
    models::ServiceRequest,
    AppState,
};

pub async fn create_service_request(
    State(state): State<AppState>,
    caller: CallerContext,
    ValidatedJson(payload): ValidatedJson<CreateServiceRequestRequest>,
) -> Result<(StatusCode, Json<ServiceRequestResponse>), AppError> {
    let client_id = match (caller.is_admin(), payload.client_id) {
        (true, Some(client_id)) => client_id,
        _ => caller.user_id.clone(),
    };

    let request = ServiceRequest::new(client_id, payload.description, payload.preferred_date);
    state
        .stores
        .scheduling
        .insert_service_request(&request)
        .await?;

    tracing::info!(
        request_id = %request.id,
        client_id = %request.client_id,
        "Service request filed"
    );

    Ok((
        StatusCode::CREATED,
        Json(ServiceRequestResponse::from(request)),
    ))
}

/// Admins may filter by client; clients always see only their own.
pub async fn list_service_requests(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(query): Query<ServiceRequestQuery>,
) -> Result<Json<Vec<ServiceRequestResponse>>, AppError> {
    let client_id = match caller.client_scope() {
        Some(own) => Some(own),
        None => query.client_id.as_deref(),
    };

    let requests = state
        .stores
        .scheduling
        .list_service_requests(client_id)
        .await?;

    Ok(Json(
        requests
            .into_iter()
            .map(ServiceRequestResponse::from)
            .collect(),
    ))
}

pub async fn update_service_request_status(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(request_id): Path<String>,
    Json(payload): Json<UpdateServiceRequestStatusRequest>,
) -> Result<Json<ServiceRequestResponse>, AppError> {
    caller.require_admin()?;

    tracing::info!(
        request_id = %request_id,
        new_status = payload.status.as_str(),
        "Updating service request status"
    );

    let request = state
        .stores
        .scheduling
        .update_service_request_status(&request_id, payload.status)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service request not found")))?;

    Ok(Json(ServiceRequestResponse::from(request)))
}
