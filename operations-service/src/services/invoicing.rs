//! Monthly invoice consolidation.
//!
//! One invoice per client per billing month, built from the subscription's
//! recurring items followed by every uninvoiced one-off service for that
//! month. Uniqueness is enforced by the store: a duplicate insert is reported
//! as [`InvoiceError::AlreadyGenerated`] no matter which caller won the race.
//!
//! Write order after the draft is computed:
//! 1. insert the invoice (the commit point)
//! 2. flag the consumed services with the invoice id
//! 3. claim the invoice's finalization marker
//! 4. stamp the subscription's last invoice date
//! 5. email the client
//!
//! A failure in step 2 surfaces as [`InvoiceError::ConsumedFlagUpdate`] and
//! is repaired by [`InvoiceConsolidator::settle_consumed_services`], which
//! replays the flag update from the ids recorded on the invoice and then runs
//! steps 3 to 5 if no earlier call claimed the marker. Failures in steps 4
//! and 5 are logged and never undo the invoice.

use super::metrics::{record_due_invoice_run, record_invoice_generation, record_notification};
use super::notifier::{InvoiceEmail, InvoiceNotifier};
use super::store::{BillingStore, StoreError};
use crate::models::{
    BillingMonth, Invoice, InvoiceLineItem, InvoiceStatus, LineItemSource, PendingService,
    Subscription,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("Invoice already generated for {billing_month}")]
    AlreadyGenerated { billing_month: String },

    #[error("No active subscription")]
    NoActiveSubscription,

    #[error("Invalid billing period: {0}")]
    InvalidBillingPeriod(String),

    #[error("Invoice {0} not found")]
    InvoiceNotFound(String),

    #[error("Invoice {invoice_id} was stored but its services could not be flagged: {source}")]
    ConsumedFlagUpdate {
        invoice_id: String,
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InvoiceError {
    fn outcome(&self) -> &'static str {
        match self {
            InvoiceError::AlreadyGenerated { .. } => "already_generated",
            InvoiceError::NoActiveSubscription => "no_subscription",
            InvoiceError::InvalidBillingPeriod(_) => "invalid_period",
            InvoiceError::InvoiceNotFound(_) => "not_found",
            InvoiceError::ConsumedFlagUpdate { .. } => "flag_update_failed",
            InvoiceError::Store(_) => "error",
        }
    }
}

impl From<InvoiceError> for AppError {
    fn from(err: InvoiceError) -> Self {
        match err {
            InvoiceError::AlreadyGenerated { .. } => AppError::Conflict(anyhow::anyhow!(err)),
            InvoiceError::NoActiveSubscription => AppError::BadRequest(anyhow::anyhow!(err)),
            InvoiceError::InvalidBillingPeriod(msg) => AppError::InvalidInput(msg),
            InvoiceError::InvoiceNotFound(_) => AppError::NotFound(anyhow::anyhow!(err)),
            InvoiceError::ConsumedFlagUpdate { .. } => AppError::InternalError(anyhow::anyhow!(err)),
            InvoiceError::Store(e) => e.into(),
        }
    }
}

/// What happened to the invoice email. Never affects the stored invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Sent,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct GeneratedInvoice {
    pub invoice: Invoice,
    pub notification: NotificationOutcome,
}

/// Read-only view of what generation would produce.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePreview {
    pub client_id: String,
    pub billing_month: String,
    pub line_items: Vec<InvoiceLineItem>,
    pub recurring_total: Decimal,
    pub one_time_total: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueInvoiceRun {
    pub run_date: NaiveDate,
    pub generated_count: usize,
    pub error_messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub invoice_id: String,
    pub flagged: u64,
    /// Present when this call finished an invoice that was never finalized.
    pub notification: Option<NotificationOutcome>,
}

struct Draft {
    subscription: Subscription,
    services: Vec<PendingService>,
    line_items: Vec<InvoiceLineItem>,
    recurring_total: Decimal,
    subtotal: Decimal,
    tax: Decimal,
    total: Decimal,
    due_date: DateTime<Utc>,
}

pub struct InvoiceConsolidator {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn InvoiceNotifier>,
    due_days: i64,
}

impl InvoiceConsolidator {
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn InvoiceNotifier>,
        due_days: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            due_days,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn generate_monthly_invoice(
        &self,
        client_id: &str,
        year: i32,
        month: u32,
    ) -> Result<GeneratedInvoice, InvoiceError> {
        let result = self.generate(client_id, year, month).await;
        match &result {
            Ok(generated) => {
                record_invoice_generation("generated");
                tracing::info!(
                    invoice_id = %generated.invoice.id,
                    billing_month = %generated.invoice.billing_month,
                    total = %generated.invoice.total,
                    lines = generated.invoice.line_items.len(),
                    "Monthly invoice generated"
                );
            }
            Err(e) => {
                record_invoice_generation(e.outcome());
                tracing::info!(error = %e, "Monthly invoice not generated");
            }
        }
        result
    }

    async fn generate(
        &self,
        client_id: &str,
        year: i32,
        month: u32,
    ) -> Result<GeneratedInvoice, InvoiceError> {
        let period = billing_period(year, month)?;
        let draft = self.draft(client_id, &period).await?;

        let now = Utc::now();
        let consumed_service_ids: Vec<String> =
            draft.services.iter().map(|s| s.id.clone()).collect();
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            user_id: client_id.to_string(),
            subscription_id: draft.subscription.id.clone(),
            billing_month: period.key(),
            line_items: draft.line_items,
            subtotal: draft.subtotal,
            tax: draft.tax,
            total: draft.total,
            due_date: draft.due_date,
            status: InvoiceStatus::Pending,
            consumed_service_ids,
            finalized_at: None,
            created_at: now,
        };

        match self.store.insert_invoice(&invoice).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(InvoiceError::AlreadyGenerated {
                    billing_month: period.key(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        self.flag_consumed(&invoice)
            .await
            .map_err(|source| {
                tracing::error!(
                    invoice_id = %invoice.id,
                    error = %source,
                    "Invoice stored but consumed services not flagged; settle to retry"
                );
                InvoiceError::ConsumedFlagUpdate {
                    invoice_id: invoice.id.clone(),
                    source,
                }
            })?;

        let notification = self
            .finalize(&invoice, &draft.subscription.billing_email)
            .await
            .unwrap_or_else(|| NotificationOutcome::Skipped {
                reason: "invoice already finalized".to_string(),
            });

        Ok(GeneratedInvoice {
            invoice,
            notification,
        })
    }

    /// Same computation as generation, without writing anything.
    #[tracing::instrument(skip(self))]
    pub async fn preview_monthly_invoice(
        &self,
        client_id: &str,
        year: i32,
        month: u32,
    ) -> Result<InvoicePreview, InvoiceError> {
        let period = billing_period(year, month)?;
        let draft = self.draft(client_id, &period).await?;

        Ok(InvoicePreview {
            client_id: client_id.to_string(),
            billing_month: period.key(),
            line_items: draft.line_items,
            recurring_total: draft.recurring_total,
            one_time_total: draft.subtotal - draft.recurring_total,
            subtotal: draft.subtotal,
            tax: draft.tax,
            total: draft.total,
            due_date: draft.due_date,
        })
    }

    /// Bill every active subscription whose billing day is `today`'s day of
    /// month. Each client is independent; failures are collected, not fatal.
    #[tracing::instrument(skip(self))]
    pub async fn generate_due_invoices(
        &self,
        today: NaiveDate,
    ) -> Result<DueInvoiceRun, InvoiceError> {
        let period = BillingMonth::of(today);
        let due = self.store.subscriptions_due(today.day() as i32).await?;

        let mut run = DueInvoiceRun {
            run_date: today,
            generated_count: 0,
            error_messages: Vec::new(),
        };

        for subscription in due {
            match self
                .generate_monthly_invoice(&subscription.user_id, period.year(), period.month())
                .await
            {
                Ok(_) => run.generated_count += 1,
                Err(e) => run
                    .error_messages
                    .push(format!("{}: {}", subscription.user_id, e)),
            }
        }

        record_due_invoice_run();
        tracing::info!(
            run_date = %today,
            generated = run.generated_count,
            failed = run.error_messages.len(),
            "Due invoice run finished"
        );
        Ok(run)
    }

    /// Re-apply the consumed flags recorded on an invoice and finish its
    /// stamping and email if those never ran. Safe to repeat.
    #[tracing::instrument(skip(self))]
    pub async fn settle_consumed_services(
        &self,
        invoice_id: &str,
    ) -> Result<Settlement, InvoiceError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| InvoiceError::InvoiceNotFound(invoice_id.to_string()))?;

        let flagged = self.flag_consumed(&invoice).await?;

        let notification = if invoice.finalized_at.is_none() {
            let billing_email = self
                .store
                .get_subscription(&invoice.user_id)
                .await?
                .map(|s| s.billing_email)
                .unwrap_or_default();
            self.finalize(&invoice, &billing_email).await
        } else {
            None
        };

        tracing::info!(
            invoice_id = %invoice_id,
            flagged,
            finalized = notification.is_some(),
            "Consumed services settled"
        );
        Ok(Settlement {
            invoice_id: invoice.id,
            flagged,
            notification,
        })
    }

    /// Stamp the subscription and email the client, once per invoice.
    /// Returns `None` when another call already finalized it.
    async fn finalize(
        &self,
        invoice: &Invoice,
        billing_email: &str,
    ) -> Option<NotificationOutcome> {
        let now = Utc::now();
        match self.store.claim_invoice_finalization(&invoice.id, now).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                tracing::error!(
                    invoice_id = %invoice.id,
                    error = %e,
                    "Failed to claim invoice finalization; settle to retry"
                );
                return Some(NotificationOutcome::Skipped {
                    reason: "finalization pending".to_string(),
                });
            }
        }

        if let Err(e) = self
            .store
            .record_invoice_date(&invoice.subscription_id, now)
            .await
        {
            tracing::warn!(
                subscription_id = %invoice.subscription_id,
                error = %e,
                "Failed to record last invoice date"
            );
        }

        Some(self.notify(billing_email, invoice).await)
    }

    async fn flag_consumed(&self, invoice: &Invoice) -> Result<u64, StoreError> {
        if invoice.consumed_service_ids.is_empty() {
            return Ok(0);
        }
        let flagged = self
            .store
            .mark_services_invoiced(&invoice.consumed_service_ids, &invoice.id)
            .await?;
        if flagged as usize != invoice.consumed_service_ids.len() {
            tracing::debug!(
                invoice_id = %invoice.id,
                expected = invoice.consumed_service_ids.len(),
                flagged,
                "Some consumed services were already flagged"
            );
        }
        Ok(flagged)
    }

    async fn draft(&self, client_id: &str, period: &BillingMonth) -> Result<Draft, InvoiceError> {
        let billing_month = period.key();

        if self
            .store
            .find_invoice(client_id, &billing_month)
            .await?
            .is_some()
        {
            return Err(InvoiceError::AlreadyGenerated { billing_month });
        }

        let subscription = self
            .store
            .get_subscription(client_id)
            .await?
            .filter(|s| s.active)
            .ok_or(InvoiceError::NoActiveSubscription)?;

        let services = self
            .store
            .uninvoiced_services(client_id, &billing_month)
            .await?;

        let mut line_items: Vec<InvoiceLineItem> = subscription
            .recurring_items
            .iter()
            .map(|item| InvoiceLineItem::from_item(item, LineItemSource::Recurring))
            .collect();
        let recurring_total: Decimal = line_items.iter().map(|l| l.amount).sum();
        line_items.extend(
            services
                .iter()
                .map(|s| InvoiceLineItem::from_item(&s.line_item(), LineItemSource::OneTime)),
        );

        let subtotal: Decimal = line_items.iter().map(|l| l.amount).sum();
        // No tax rules yet.
        let tax = Decimal::ZERO;

        Ok(Draft {
            subscription,
            services,
            line_items,
            recurring_total,
            subtotal,
            tax,
            total: subtotal + tax,
            due_date: Utc::now() + Duration::days(self.due_days),
        })
    }

    async fn notify(&self, billing_email: &str, invoice: &Invoice) -> NotificationOutcome {
        let outcome = if billing_email.trim().is_empty() {
            NotificationOutcome::Skipped {
                reason: "no billing email".to_string(),
            }
        } else if !self.notifier.is_enabled() {
            NotificationOutcome::Skipped {
                reason: "email delivery disabled".to_string(),
            }
        } else {
            let email = InvoiceEmail::for_invoice(billing_email, invoice);
            match self.notifier.send_invoice_email(&email).await {
                Ok(()) => NotificationOutcome::Sent,
                Err(e) => {
                    tracing::error!(
                        invoice_id = %invoice.id,
                        error = %e,
                        "Invoice email failed; invoice is kept"
                    );
                    NotificationOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            }
        };

        record_notification(match outcome {
            NotificationOutcome::Sent => "sent",
            NotificationOutcome::Skipped { .. } => "skipped",
            NotificationOutcome::Failed { .. } => "failed",
        });
        outcome
    }
}

fn billing_period(year: i32, month: u32) -> Result<BillingMonth, InvoiceError> {
    BillingMonth::new(year, month).map_err(InvoiceError::InvalidBillingPeriod)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceLineItem;
    use crate::services::notifier::MockNotifier;
    use crate::services::store::MemoryStore;
    use async_trait::async_trait;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn subscribe(store: &MemoryStore, client: &str, billing_day: i32) {
        let items = vec![ServiceLineItem::new(
            "Monthly maintenance".into(),
            Decimal::ONE,
            dec("100.00"),
            None,
        )];
        let subscription = Subscription::new(
            client.into(),
            format!("{client}@example.test"),
            items,
            billing_day,
            true,
        );
        store.save_subscription(&subscription).await.unwrap();
    }

    async fn log_service(store: &MemoryStore, client: &str, on: NaiveDate, amount: &str) -> String {
        let item = ServiceLineItem::new("Call-out".into(), Decimal::ONE, dec(amount), None);
        let service = PendingService::new(
            client.into(),
            item,
            on,
            BillingMonth::of(on).key(),
        );
        store.insert_pending_service(&service).await.unwrap();
        service.id
    }

    fn consolidator(store: Arc<MemoryStore>, notifier: Arc<MockNotifier>) -> InvoiceConsolidator {
        InvoiceConsolidator::new(store, notifier, 15)
    }

    #[tokio::test]
    async fn generates_recurring_then_one_time_lines() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        subscribe(&store, "c1", 1).await;
        log_service(&store, "c1", date(2024, 3, 5), "40.00").await;
        log_service(&store, "c1", date(2024, 3, 20), "12.50").await;
        let april = log_service(&store, "c1", date(2024, 4, 2), "99.00").await;
        log_service(&store, "c2", date(2024, 3, 7), "55.00").await;

        let generated = consolidator(store.clone(), notifier.clone())
            .generate_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap();
        let invoice = generated.invoice;

        assert_eq!(invoice.billing_month, "2024-03");
        assert_eq!(invoice.line_items.len(), 3);
        assert_eq!(invoice.line_items[0].source, LineItemSource::Recurring);
        assert_eq!(invoice.line_items[1].source, LineItemSource::OneTime);
        assert_eq!(invoice.subtotal, dec("152.50"));
        assert_eq!(invoice.tax, Decimal::ZERO);
        assert_eq!(
            invoice.total,
            invoice.line_items.iter().map(|l| l.amount).sum::<Decimal>() + invoice.tax
        );
        assert!(invoice.due_date > Utc::now() + Duration::days(14));
        assert_eq!(generated.notification, NotificationOutcome::Sent);
        assert_eq!(notifier.send_count(), 1);

        let march = store.list_pending_services("c1", Some("2024-03")).await.unwrap();
        assert!(march
            .iter()
            .all(|s| s.invoiced && s.invoice_id.as_deref() == Some(invoice.id.as_str())));
        let others = store.list_pending_services("c1", Some("2024-04")).await.unwrap();
        assert_eq!(others[0].id, april);
        assert!(!others[0].invoiced);
        assert!(!store.list_pending_services("c2", None).await.unwrap()[0].invoiced);

        let subscription = store.get_subscription("c1").await.unwrap().unwrap();
        assert!(subscription.last_invoice_date.is_some());
    }

    #[tokio::test]
    async fn second_generation_is_rejected_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        subscribe(&store, "c1", 1).await;
        let consolidator = consolidator(store.clone(), notifier.clone());

        consolidator.generate_monthly_invoice("c1", 2024, 3).await.unwrap();
        log_service(&store, "c1", date(2024, 3, 28), "10.00").await;

        let err = consolidator
            .generate_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::AlreadyGenerated { .. }));
        assert_eq!(store.invoice_count().await, 1);
        assert_eq!(notifier.send_count(), 1);
        assert_eq!(store.uninvoiced_services("c1", "2024-03").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_generation_produces_one_invoice() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        subscribe(&store, "c1", 1).await;
        let consolidator = Arc::new(consolidator(store.clone(), notifier.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let consolidator = consolidator.clone();
                tokio::spawn(async move {
                    consolidator.generate_monthly_invoice("c1", 2024, 3).await
                })
            })
            .collect();

        let mut generated = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => generated += 1,
                Err(InvoiceError::AlreadyGenerated { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(generated, 1);
        assert_eq!(store.invoice_count().await, 1);
        assert_eq!(notifier.send_count(), 1);
    }

    #[tokio::test]
    async fn missing_or_inactive_subscription_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let consolidator = consolidator(store.clone(), Arc::new(MockNotifier::new()));

        let err = consolidator
            .generate_monthly_invoice("nobody", 2024, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::NoActiveSubscription));

        let paused = Subscription::new("c1".into(), "c1@example.test".into(), vec![], 1, false);
        store.save_subscription(&paused).await.unwrap();
        let err = consolidator
            .generate_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::NoActiveSubscription));
        assert_eq!(store.invoice_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_month_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let consolidator = consolidator(store, Arc::new(MockNotifier::new()));
        let err = consolidator
            .generate_monthly_invoice("c1", 2024, 13)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidBillingPeriod(_)));
    }

    #[tokio::test]
    async fn preview_splits_totals_and_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        subscribe(&store, "c1", 1).await;
        log_service(&store, "c1", date(2024, 3, 5), "40.00").await;

        let preview = consolidator(store.clone(), notifier.clone())
            .preview_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap();

        assert_eq!(preview.recurring_total, dec("100.00"));
        assert_eq!(preview.one_time_total, dec("40.00"));
        assert_eq!(preview.total, dec("140.00"));
        assert_eq!(store.invoice_count().await, 0);
        assert_eq!(store.uninvoiced_services("c1", "2024-03").await.unwrap().len(), 1);
        assert_eq!(notifier.send_count(), 0);
    }

    #[tokio::test]
    async fn due_run_bills_matching_clients_and_collects_failures() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        subscribe(&store, "c1", 1).await;
        subscribe(&store, "c2", 1).await;
        subscribe(&store, "c3", 15).await;
        log_service(&store, "c1", date(2024, 3, 1), "20.00").await;

        let consolidator = consolidator(store.clone(), notifier.clone());
        let run = consolidator
            .generate_due_invoices(date(2024, 3, 1))
            .await
            .unwrap();
        assert_eq!(run.generated_count, 2);
        assert!(run.error_messages.is_empty());

        let c2 = store.find_invoice("c2", "2024-03").await.unwrap().unwrap();
        assert!(c2
            .line_items
            .iter()
            .all(|l| l.source == LineItemSource::Recurring));
        assert!(store.find_invoice("c3", "2024-03").await.unwrap().is_none());

        let rerun = consolidator
            .generate_due_invoices(date(2024, 3, 1))
            .await
            .unwrap();
        assert_eq!(rerun.generated_count, 0);
        assert_eq!(rerun.error_messages.len(), 2);
        assert!(rerun.error_messages[0].starts_with("c1: "));
    }

    #[tokio::test]
    async fn email_failure_keeps_the_invoice() {
        let store = Arc::new(MemoryStore::new());
        subscribe(&store, "c1", 1).await;
        let consolidator = InvoiceConsolidator::new(
            store.clone(),
            Arc::new(MockNotifier::failing()),
            15,
        );

        let generated = consolidator
            .generate_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap();
        assert!(matches!(
            generated.notification,
            NotificationOutcome::Failed { .. }
        ));
        assert_eq!(store.invoice_count().await, 1);
    }

    /// Delegates to a memory store but refuses to flag services.
    struct FlagFailingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl BillingStore for FlagFailingStore {
        async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
            self.inner.get_subscription(user_id).await
        }
        async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
            self.inner.save_subscription(subscription).await
        }
        async fn subscriptions_due(&self, day: i32) -> Result<Vec<Subscription>, StoreError> {
            self.inner.subscriptions_due(day).await
        }
        async fn record_invoice_date(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.record_invoice_date(id, at).await
        }
        async fn insert_pending_service(&self, service: &PendingService) -> Result<(), StoreError> {
            self.inner.insert_pending_service(service).await
        }
        async fn list_pending_services(
            &self,
            user_id: &str,
            month: Option<&str>,
        ) -> Result<Vec<PendingService>, StoreError> {
            self.inner.list_pending_services(user_id, month).await
        }
        async fn uninvoiced_services(
            &self,
            user_id: &str,
            month: &str,
        ) -> Result<Vec<PendingService>, StoreError> {
            self.inner.uninvoiced_services(user_id, month).await
        }
        async fn mark_services_invoiced(
            &self,
            _ids: &[String],
            _invoice_id: &str,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Serialization("flag write refused".into()))
        }
        async fn find_invoice(&self, user_id: &str, month: &str) -> Result<Option<Invoice>, StoreError> {
            self.inner.find_invoice(user_id, month).await
        }
        async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, StoreError> {
            self.inner.get_invoice(id).await
        }
        async fn list_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, StoreError> {
            self.inner.list_invoices(user_id).await
        }
        async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
            self.inner.insert_invoice(invoice).await
        }
        async fn claim_invoice_finalization(
            &self,
            id: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.claim_invoice_finalization(id, at).await
        }
    }

    #[tokio::test]
    async fn flag_failure_is_reported_after_commit_and_settle_repairs_it() {
        let memory = MemoryStore::new();
        subscribe(&memory, "c1", 1).await;
        log_service(&memory, "c1", date(2024, 3, 5), "40.00").await;
        let notifier = Arc::new(MockNotifier::new());

        let failing = InvoiceConsolidator::new(
            Arc::new(FlagFailingStore {
                inner: memory.clone(),
            }),
            notifier.clone(),
            15,
        );
        let err = failing
            .generate_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap_err();
        let invoice_id = match err {
            InvoiceError::ConsumedFlagUpdate { invoice_id, .. } => invoice_id,
            other => panic!("expected ConsumedFlagUpdate, got {other}"),
        };
        assert_eq!(memory.invoice_count().await, 1);
        assert_eq!(notifier.send_count(), 0);
        assert_eq!(memory.uninvoiced_services("c1", "2024-03").await.unwrap().len(), 1);
        assert!(memory
            .get_subscription("c1")
            .await
            .unwrap()
            .unwrap()
            .last_invoice_date
            .is_none());

        let healthy = consolidator(Arc::new(memory.clone()), notifier.clone());
        let settled = healthy.settle_consumed_services(&invoice_id).await.unwrap();
        assert_eq!(settled.flagged, 1);
        assert_eq!(settled.notification, Some(NotificationOutcome::Sent));
        assert!(memory.uninvoiced_services("c1", "2024-03").await.unwrap().is_empty());
        assert_eq!(notifier.send_count(), 1);
        assert!(memory
            .get_subscription("c1")
            .await
            .unwrap()
            .unwrap()
            .last_invoice_date
            .is_some());

        let again = healthy.settle_consumed_services(&invoice_id).await.unwrap();
        assert_eq!(again.flagged, 0);
        assert_eq!(again.notification, None);
        assert_eq!(notifier.send_count(), 1);

        let err = healthy
            .generate_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::AlreadyGenerated { .. }));
    }

    #[tokio::test]
    async fn settling_a_finalized_invoice_sends_no_second_email() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        subscribe(&store, "c1", 1).await;
        let consolidator = consolidator(store.clone(), notifier.clone());

        let generated = consolidator
            .generate_monthly_invoice("c1", 2024, 3)
            .await
            .unwrap();
        assert!(store
            .get_invoice(&generated.invoice.id)
            .await
            .unwrap()
            .unwrap()
            .finalized_at
            .is_some());

        let settled = consolidator
            .settle_consumed_services(&generated.invoice.id)
            .await
            .unwrap();
        assert_eq!(settled.notification, None);
        assert_eq!(notifier.send_count(), 1);
    }
}
