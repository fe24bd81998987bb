//! Persistence seams for scheduling and billing data.
//!
//! Both traits are object-safe and are held as `Arc<dyn ...>` by the services.
//! `MongoStore` backs production; `MemoryStore` backs tests and local runs
//! without a database.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::models::{
    BusinessHoursSettings, Invoice, Meeting, MeetingStatus, PendingService, ServiceRequest,
    ServiceRequestStatus, Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            StoreError::Database(e) => AppError::DatabaseError(e.into()),
            StoreError::Serialization(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}

#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn list_meetings(&self) -> Result<Vec<Meeting>, StoreError>;
    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StoreError>;
    async fn insert_meeting(&self, meeting: &Meeting) -> Result<(), StoreError>;
    /// Returns the updated meeting, or `None` when the id is unknown.
    async fn update_meeting_status(
        &self,
        id: &str,
        status: MeetingStatus,
    ) -> Result<Option<Meeting>, StoreError>;

    async fn business_hours(&self) -> Result<Option<BusinessHoursSettings>, StoreError>;
    async fn save_business_hours(&self, settings: &BusinessHoursSettings)
        -> Result<(), StoreError>;

    async fn insert_service_request(&self, request: &ServiceRequest) -> Result<(), StoreError>;
    /// All requests, or only the given client's.
    async fn list_service_requests(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<ServiceRequest>, StoreError>;
    async fn update_service_request_status(
        &self,
        id: &str,
        status: ServiceRequestStatus,
    ) -> Result<Option<ServiceRequest>, StoreError>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError>;
    /// Create the subscription for `subscription.user_id`, or update the
    /// admin-editable terms of the existing one. An existing subscription
    /// keeps its id, creation time and `last_invoice_date`.
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;
    /// Active subscriptions billed on the given day of month.
    async fn subscriptions_due(&self, billing_day: i32) -> Result<Vec<Subscription>, StoreError>;
    async fn record_invoice_date(
        &self,
        subscription_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_pending_service(&self, service: &PendingService) -> Result<(), StoreError>;
    async fn list_pending_services(
        &self,
        user_id: &str,
        billing_month: Option<&str>,
    ) -> Result<Vec<PendingService>, StoreError>;
    /// Services for the exact client and month that no invoice has consumed.
    async fn uninvoiced_services(
        &self,
        user_id: &str,
        billing_month: &str,
    ) -> Result<Vec<PendingService>, StoreError>;
    /// Flag the given services as consumed by `invoice_id`. Services that are
    /// already invoiced are left alone. Returns how many were flipped.
    async fn mark_services_invoiced(
        &self,
        service_ids: &[String],
        invoice_id: &str,
    ) -> Result<u64, StoreError>;

    async fn find_invoice(
        &self,
        user_id: &str,
        billing_month: &str,
    ) -> Result<Option<Invoice>, StoreError>;
    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, StoreError>;
    async fn list_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, StoreError>;
    /// Fails with [`StoreError::Duplicate`] if an invoice already exists for
    /// the same `(user_id, billing_month)`.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;
    /// Set `finalized_at` if it is still unset. Returns `true` only for the
    /// call that set it, so post-commit side effects run at most once.
    async fn claim_invoice_finalization(
        &self,
        invoice_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Both store seams, usually backed by the same implementation.
#[derive(Clone)]
pub struct Stores {
    pub billing: Arc<dyn BillingStore>,
    pub scheduling: Arc<dyn SchedulingStore>,
}

impl Stores {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: BillingStore + SchedulingStore + 'static,
    {
        Self {
            billing: store.clone(),
            scheduling: store,
        }
    }
}
