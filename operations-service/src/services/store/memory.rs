//! In-memory store. Data is lost when the process exits.

use super::{BillingStore, SchedulingStore, StoreError};
use crate::models::{
    BusinessHoursSettings, Invoice, Meeting, MeetingStatus, PendingService, ServiceRequest,
    ServiceRequestStatus, Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Collections {
    meetings: HashMap<String, Meeting>,
    business_hours: Option<BusinessHoursSettings>,
    service_requests: HashMap<String, ServiceRequest>,
    /// Keyed by user id; one subscription per client.
    subscriptions: HashMap<String, Subscription>,
    pending_services: HashMap<String, PendingService>,
    invoices: HashMap<String, Invoice>,
}

/// Thread-safe via a single `tokio::sync::RwLock`, so a check-and-insert done
/// under one write guard is atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored invoices.
    pub async fn invoice_count(&self) -> usize {
        self.inner.read().await.invoices.len()
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_meetings(&self) -> Result<Vec<Meeting>, StoreError> {
        let inner = self.inner.read().await;
        let mut meetings: Vec<Meeting> = inner.meetings.values().cloned().collect();
        meetings.sort_by_key(|m| m.start);
        Ok(meetings)
    }

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StoreError> {
        Ok(self.inner.read().await.meetings.get(id).cloned())
    }

    async fn insert_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.meetings.contains_key(&meeting.id) {
            return Err(StoreError::Duplicate(format!("meeting {}", meeting.id)));
        }
        inner.meetings.insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    async fn update_meeting_status(
        &self,
        id: &str,
        status: MeetingStatus,
    ) -> Result<Option<Meeting>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.meetings.get_mut(id).map(|meeting| {
            meeting.status = status;
            meeting.clone()
        }))
    }

    async fn business_hours(&self) -> Result<Option<BusinessHoursSettings>, StoreError> {
        Ok(self.inner.read().await.business_hours.clone())
    }

    async fn save_business_hours(
        &self,
        settings: &BusinessHoursSettings,
    ) -> Result<(), StoreError> {
        self.inner.write().await.business_hours = Some(settings.clone());
        Ok(())
    }

    async fn insert_service_request(&self, request: &ServiceRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.service_requests.contains_key(&request.id) {
            return Err(StoreError::Duplicate(format!("service request {}", request.id)));
        }
        inner
            .service_requests
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn list_service_requests(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        let inner = self.inner.read().await;
        let mut requests: Vec<ServiceRequest> = inner
            .service_requests
            .values()
            .filter(|r| client_id.map_or(true, |c| r.client_id == c))
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn update_service_request_status(
        &self,
        id: &str,
        status: ServiceRequestStatus,
    ) -> Result<Option<ServiceRequest>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.service_requests.get_mut(id).map(|request| {
            request.status = status;
            request.updated_at = Utc::now();
            request.clone()
        }))
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self.inner.read().await.subscriptions.get(user_id).cloned())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.subscriptions.get_mut(&subscription.user_id) {
            Some(existing) => {
                existing.billing_email = subscription.billing_email.clone();
                existing.recurring_items = subscription.recurring_items.clone();
                existing.monthly_recurring_total = subscription.monthly_recurring_total;
                existing.billing_day = subscription.billing_day;
                existing.active = subscription.active;
                existing.updated_at = subscription.updated_at;
            }
            None => {
                inner
                    .subscriptions
                    .insert(subscription.user_id.clone(), subscription.clone());
            }
        }
        Ok(())
    }

    async fn subscriptions_due(&self, billing_day: i32) -> Result<Vec<Subscription>, StoreError> {
        let inner = self.inner.read().await;
        let mut due: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.active && s.billing_day == billing_day)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(due)
    }

    async fn record_invoice_date(
        &self,
        subscription_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(subscription) = inner
            .subscriptions
            .values_mut()
            .find(|s| s.id == subscription_id)
        {
            subscription.last_invoice_date = Some(at);
            subscription.updated_at = at;
        }
        Ok(())
    }

    async fn insert_pending_service(&self, service: &PendingService) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.pending_services.contains_key(&service.id) {
            return Err(StoreError::Duplicate(format!("pending service {}", service.id)));
        }
        inner
            .pending_services
            .insert(service.id.clone(), service.clone());
        Ok(())
    }

    async fn list_pending_services(
        &self,
        user_id: &str,
        billing_month: Option<&str>,
    ) -> Result<Vec<PendingService>, StoreError> {
        let inner = self.inner.read().await;
        let mut services: Vec<PendingService> = inner
            .pending_services
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| billing_month.map_or(true, |m| s.billing_month == m))
            .cloned()
            .collect();
        services.sort_by_key(|s| (s.service_date, s.created_at));
        Ok(services)
    }

    async fn uninvoiced_services(
        &self,
        user_id: &str,
        billing_month: &str,
    ) -> Result<Vec<PendingService>, StoreError> {
        let inner = self.inner.read().await;
        let mut services: Vec<PendingService> = inner
            .pending_services
            .values()
            .filter(|s| s.user_id == user_id && s.billing_month == billing_month && !s.invoiced)
            .cloned()
            .collect();
        services.sort_by_key(|s| (s.service_date, s.created_at));
        Ok(services)
    }

    async fn mark_services_invoiced(
        &self,
        service_ids: &[String],
        invoice_id: &str,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut flipped = 0;
        for id in service_ids {
            if let Some(service) = inner.pending_services.get_mut(id) {
                if !service.invoiced {
                    service.invoiced = true;
                    service.invoice_id = Some(invoice_id.to_string());
                    flipped += 1;
                }
            }
        }
        Ok(flipped)
    }

    async fn find_invoice(
        &self,
        user_id: &str,
        billing_month: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .invoices
            .values()
            .find(|i| i.user_id == user_id && i.billing_month == billing_month)
            .cloned())
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, StoreError> {
        Ok(self.inner.read().await.invoices.get(id).cloned())
    }

    async fn list_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, StoreError> {
        let inner = self.inner.read().await;
        let mut invoices: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.billing_month.cmp(&a.billing_month));
        Ok(invoices)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let exists = inner.invoices.values().any(|i| {
            i.id == invoice.id
                || (i.user_id == invoice.user_id && i.billing_month == invoice.billing_month)
        });
        if exists {
            return Err(StoreError::Duplicate(format!(
                "invoice for {} {}",
                invoice.user_id, invoice.billing_month
            )));
        }
        inner.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(())
    }

    async fn claim_invoice_finalization(
        &self,
        invoice_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.invoices.get_mut(invoice_id) {
            Some(invoice) if invoice.finalized_at.is_none() => {
                invoice.finalized_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
