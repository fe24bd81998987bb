use crate::models::{
    Invoice, InvoiceLineItem, InvoiceStatus, PendingService, ServiceLineItem, Subscription,
};
use crate::services::NotificationOutcome;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_line_amounts"))]
pub struct LineItemPayload {
    #[validate(length(min = 1, max = 200, message = "Description must be 1-200 characters"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Derived from quantity and unit price when omitted.
    pub amount: Option<Decimal>,
}

fn validate_line_amounts(item: &LineItemPayload) -> Result<(), ValidationError> {
    check_amounts(item.quantity, item.unit_price, item.amount)
}

fn check_amounts(
    quantity: Decimal,
    unit_price: Decimal,
    amount: Option<Decimal>,
) -> Result<(), ValidationError> {
    if quantity <= Decimal::ZERO {
        return Err(ValidationError::new("quantity_must_be_positive"));
    }
    if unit_price < Decimal::ZERO {
        return Err(ValidationError::new("unit_price_must_not_be_negative"));
    }
    if amount.is_some_and(|amount| amount < Decimal::ZERO) {
        return Err(ValidationError::new("amount_must_not_be_negative"));
    }
    Ok(())
}

impl From<LineItemPayload> for ServiceLineItem {
    fn from(payload: LineItemPayload) -> Self {
        ServiceLineItem::new(
            payload.description,
            payload.quantity,
            payload.unit_price,
            payload.amount,
        )
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertSubscriptionRequest {
    #[validate(email(message = "Billing email must be a valid address"))]
    pub billing_email: Option<String>,

    #[validate(nested)]
    pub recurring_items: Vec<LineItemPayload>,

    #[validate(range(min = 1, max = 28, message = "Billing day must be between 1 and 28"))]
    pub billing_day: i32,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub client_id: String,
    pub billing_email: String,
    pub recurring_items: Vec<ServiceLineItem>,
    pub monthly_recurring_total: Decimal,
    pub billing_day: i32,
    pub active: bool,
    pub last_invoice_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            client_id: subscription.user_id,
            billing_email: subscription.billing_email,
            recurring_items: subscription.recurring_items,
            monthly_recurring_total: subscription.monthly_recurring_total,
            billing_day: subscription.billing_day,
            active: subscription.active,
            last_invoice_date: subscription.last_invoice_date,
            updated_at: subscription.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_logged_amounts"))]
pub struct LogServiceRequest {
    #[validate(length(min = 1, max = 200, message = "Description must be 1-200 characters"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Option<Decimal>,

    pub service_date: NaiveDate,

    /// `YYYY-MM`; defaults to the service date's month.
    pub billing_month: Option<String>,
}

impl LogServiceRequest {
    pub fn line_item(&self) -> ServiceLineItem {
        ServiceLineItem::new(
            self.description.clone(),
            self.quantity,
            self.unit_price,
            self.amount,
        )
    }
}

fn validate_logged_amounts(request: &LogServiceRequest) -> Result<(), ValidationError> {
    check_amounts(request.quantity, request.unit_price, request.amount)
}

#[derive(Debug, Deserialize)]
pub struct ServicesQuery {
    pub billing_month: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PendingServiceResponse {
    pub id: String,
    pub client_id: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub service_date: NaiveDate,
    pub billing_month: String,
    pub invoiced: bool,
    pub invoice_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PendingService> for PendingServiceResponse {
    fn from(service: PendingService) -> Self {
        Self {
            id: service.id,
            client_id: service.user_id,
            description: service.description,
            quantity: service.quantity,
            unit_price: service.unit_price,
            amount: service.amount,
            service_date: service.service_date,
            billing_month: service.billing_month,
            invoiced: service.invoiced,
            invoice_id: service.invoice_id,
            created_at: service.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BillingPeriodRequest {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub client_id: String,
    pub subscription_id: String,
    pub billing_month: String,
    pub line_items: Vec<InvoiceLineItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub due_date: DateTime<Utc>,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            client_id: invoice.user_id,
            subscription_id: invoice.subscription_id,
            billing_month: invoice.billing_month,
            line_items: invoice.line_items,
            subtotal: invoice.subtotal,
            tax: invoice.tax,
            total: invoice.total,
            due_date: invoice.due_date,
            status: invoice.status,
            created_at: invoice.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateInvoiceResponse {
    pub invoice: InvoiceResponse,
    pub notification: NotificationOutcome,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunDueInvoicesRequest {
    /// Defaults to today at the business offset.
    pub date: Option<NaiveDate>,
}
