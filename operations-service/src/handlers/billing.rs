//! Subscriptions, one-off services and invoices.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use std::str::FromStr;

use crate::{
    dtos::{
        BillingPeriodRequest, GenerateInvoiceResponse, InvoiceResponse, LogServiceRequest,
        PendingServiceResponse, RunDueInvoicesRequest, ServicesQuery, SubscriptionResponse,
        UpsertSubscriptionRequest,
    },
    middleware::{CallerContext, ValidatedJson},
    models::{BillingMonth, PendingService, ServiceLineItem, Subscription},
    services::{DueInvoiceRun, InvoiceError, InvoicePreview, Settlement},
    AppState,
};

fn parse_billing_month(raw: &str) -> Result<BillingMonth, AppError> {
    BillingMonth::from_str(raw.trim()).map_err(AppError::InvalidInput)
}

/// Create or replace a client's subscription. The recurring total is
/// recomputed from the submitted items.
pub async fn upsert_subscription(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(client_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<UpsertSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    caller.require_admin()?;

    let items: Vec<ServiceLineItem> = payload
        .recurring_items
        .into_iter()
        .map(ServiceLineItem::from)
        .collect();

    let subscription = match state.stores.billing.get_subscription(&client_id).await? {
        Some(mut existing) => {
            existing.set_recurring_items(items);
            if let Some(email) = payload.billing_email {
                existing.billing_email = email;
            }
            existing.billing_day = payload.billing_day;
            existing.active = payload.active;
            existing
        }
        None => Subscription::new(
            client_id.clone(),
            payload.billing_email.unwrap_or_default(),
            items,
            payload.billing_day,
            payload.active,
        ),
    };

    state
        .stores
        .billing
        .save_subscription(&subscription)
        .await?;

    tracing::info!(
        client_id = %client_id,
        subscription_id = %subscription.id,
        monthly_recurring_total = %subscription.monthly_recurring_total,
        billing_day = subscription.billing_day,
        active = subscription.active,
        "Subscription saved"
    );

    Ok(Json(SubscriptionResponse::from(subscription)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(client_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    caller.ensure_can_access(&client_id)?;

    let subscription = state
        .stores
        .billing
        .get_subscription(&client_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

    Ok(Json(SubscriptionResponse::from(subscription)))
}

/// Log a one-off billable service. The amount is derived only when omitted.
pub async fn log_service(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(client_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<LogServiceRequest>,
) -> Result<(StatusCode, Json<PendingServiceResponse>), AppError> {
    caller.require_admin()?;

    let billing_month = match payload.billing_month.as_deref() {
        Some(raw) => parse_billing_month(raw)?,
        None => BillingMonth::of(payload.service_date),
    };

    let service = PendingService::new(
        client_id,
        payload.line_item(),
        payload.service_date,
        billing_month.key(),
    );
    state
        .stores
        .billing
        .insert_pending_service(&service)
        .await?;

    tracing::info!(
        service_id = %service.id,
        client_id = %service.user_id,
        billing_month = %service.billing_month,
        amount = %service.amount,
        "Pending service logged"
    );

    Ok((
        StatusCode::CREATED,
        Json(PendingServiceResponse::from(service)),
    ))
}

pub async fn list_services(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(client_id): Path<String>,
    Query(query): Query<ServicesQuery>,
) -> Result<Json<Vec<PendingServiceResponse>>, AppError> {
    caller.ensure_can_access(&client_id)?;

    let billing_month = query
        .billing_month
        .as_deref()
        .map(parse_billing_month)
        .transpose()?
        .map(|month| month.key());

    let services = state
        .stores
        .billing
        .list_pending_services(&client_id, billing_month.as_deref())
        .await?;

    Ok(Json(
        services
            .into_iter()
            .map(PendingServiceResponse::from)
            .collect(),
    ))
}

/// Generate the client's invoice for a month. A failure to flag the
/// consumed services after the invoice is stored is reported with the
/// invoice id so the settle endpoint can repair it.
pub async fn generate_invoice(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(client_id): Path<String>,
    Json(payload): Json<BillingPeriodRequest>,
) -> Result<Response, AppError> {
    caller.require_admin()?;

    match state
        .invoicing
        .generate_monthly_invoice(&client_id, payload.year, payload.month)
        .await
    {
        Ok(generated) => Ok((
            StatusCode::CREATED,
            Json(GenerateInvoiceResponse {
                invoice: InvoiceResponse::from(generated.invoice),
                notification: generated.notification,
            }),
        )
            .into_response()),
        Err(InvoiceError::ConsumedFlagUpdate { invoice_id, source }) => {
            tracing::error!(
                invoice_id = %invoice_id,
                error = %source,
                "Invoice stored without flagging consumed services"
            );
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Invoice stored but consumed services were not flagged",
                    "invoiceId": invoice_id,
                })),
            )
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn preview_invoice(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(client_id): Path<String>,
    Query(period): Query<BillingPeriodRequest>,
) -> Result<Json<InvoicePreview>, AppError> {
    caller.ensure_can_access(&client_id)?;

    let preview = state
        .invoicing
        .preview_monthly_invoice(&client_id, period.year, period.month)
        .await?;

    Ok(Json(preview))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(client_id): Path<String>,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    caller.ensure_can_access(&client_id)?;

    let invoices = state.stores.billing.list_invoices(&client_id).await?;
    Ok(Json(invoices.into_iter().map(InvoiceResponse::from).collect()))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .stores
        .billing
        .get_invoice(&invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    // Clients get the same 404 for invoices that are not theirs.
    if caller.ensure_can_access(&invoice.user_id).is_err() {
        return Err(AppError::NotFound(anyhow::anyhow!("Invoice not found")));
    }

    Ok(Json(InvoiceResponse::from(invoice)))
}

/// Bill every subscription due on the given date (today when omitted).
pub async fn run_due_invoices(
    State(state): State<AppState>,
    caller: CallerContext,
    payload: Option<Json<RunDueInvoicesRequest>>,
) -> Result<Json<DueInvoiceRun>, AppError> {
    caller.require_admin()?;

    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let date = request.date.unwrap_or_else(|| state.availability.today());

    let run = state.invoicing.generate_due_invoices(date).await?;
    Ok(Json(run))
}

pub async fn settle_services(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(invoice_id): Path<String>,
) -> Result<Json<Settlement>, AppError> {
    caller.require_admin()?;

    let settlement = state.invoicing.settle_consumed_services(&invoice_id).await?;
    Ok(Json(settlement))
}
