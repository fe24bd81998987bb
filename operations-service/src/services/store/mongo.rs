use super::{BillingStore, SchedulingStore, StoreError};
use crate::models::{
    BusinessHoursSettings, Invoice, Meeting, MeetingStatus, PendingService, ServiceRequest,
    ServiceRequestStatus, Subscription,
};
use crate::services::metrics::observe_store_query;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReplaceOptions, ReturnDocument,
    UpdateOptions,
};
use mongodb::{Collection, Database, IndexModel};
use serde::de::DeserializeOwned;
use std::time::Instant;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    meetings: Collection<Meeting>,
    settings: Collection<BusinessHoursSettings>,
    service_requests: Collection<ServiceRequest>,
    subscriptions: Collection<Subscription>,
    pending_services: Collection<PendingService>,
    invoices: Collection<Invoice>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            meetings: db.collection("meetings"),
            settings: db.collection("settings"),
            service_requests: db.collection("service_requests"),
            subscriptions: db.collection("subscriptions"),
            pending_services: db.collection("pending_services"),
            invoices: db.collection("invoices"),
        }
    }

    /// Create indexes. The unique invoice index is what makes
    /// `insert_invoice` reject a second invoice for the same client month.
    pub async fn init_indexes(&self) -> Result<(), StoreError> {
        let invoice_month_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "billing_month": 1 })
            .options(
                IndexOptions::builder()
                    .name("invoice_user_month_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.invoices
            .create_indexes([invoice_month_index], None)
            .await?;

        let subscription_user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_user_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        let subscription_due_index = IndexModel::builder()
            .keys(doc! { "active": 1, "billing_day": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_due_idx".to_string())
                    .build(),
            )
            .build();
        self.subscriptions
            .create_indexes([subscription_user_index, subscription_due_index], None)
            .await?;

        let pending_month_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "billing_month": 1, "invoiced": 1 })
            .options(
                IndexOptions::builder()
                    .name("pending_user_month_idx".to_string())
                    .build(),
            )
            .build();
        self.pending_services
            .create_indexes([pending_month_index], None)
            .await?;

        let meeting_start_index = IndexModel::builder()
            .keys(doc! { "start": 1 })
            .options(
                IndexOptions::builder()
                    .name("meeting_start_idx".to_string())
                    .build(),
            )
            .build();
        self.meetings
            .create_indexes([meeting_start_index], None)
            .await?;

        let request_client_index = IndexModel::builder()
            .keys(doc! { "client_id": 1, "created_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("service_request_client_idx".to_string())
                    .build(),
            )
            .build();
        self.service_requests
            .create_indexes([request_client_index], None)
            .await?;

        tracing::info!("Operations store indexes initialized");
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY_CODE
    )
}

async fn find_all<T>(
    collection: &Collection<T>,
    filter: Document,
    sort: Document,
) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let options = FindOptions::builder().sort(sort).build();
    let cursor = collection.find(filter, options).await?;
    Ok(cursor.try_collect().await?)
}

fn timed(operation: &'static str, start: Instant) {
    observe_store_query(operation, start.elapsed().as_secs_f64());
}

#[async_trait]
impl SchedulingStore for MongoStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_meetings(&self) -> Result<Vec<Meeting>, StoreError> {
        let start = Instant::now();
        let meetings = find_all(&self.meetings, doc! {}, doc! { "start": 1 }).await;
        timed("list_meetings", start);
        meetings
    }

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StoreError> {
        Ok(self.meetings.find_one(doc! { "_id": id }, None).await?)
    }

    #[tracing::instrument(skip(self, meeting), fields(meeting_id = %meeting.id))]
    async fn insert_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        self.meetings.insert_one(meeting, None).await?;
        Ok(())
    }

    async fn update_meeting_status(
        &self,
        id: &str,
        status: MeetingStatus,
    ) -> Result<Option<Meeting>, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .meetings
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "status": to_bson(&status)? } },
                options,
            )
            .await?;
        Ok(updated)
    }

    async fn business_hours(&self) -> Result<Option<BusinessHoursSettings>, StoreError> {
        Ok(self
            .settings
            .find_one(doc! { "_id": BusinessHoursSettings::DOCUMENT_ID }, None)
            .await?)
    }

    async fn save_business_hours(
        &self,
        settings: &BusinessHoursSettings,
    ) -> Result<(), StoreError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.settings
            .replace_one(doc! { "_id": settings.id.as_str() }, settings, options)
            .await?;
        Ok(())
    }

    async fn insert_service_request(&self, request: &ServiceRequest) -> Result<(), StoreError> {
        self.service_requests.insert_one(request, None).await?;
        Ok(())
    }

    async fn list_service_requests(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        let filter = match client_id {
            Some(client_id) => doc! { "client_id": client_id },
            None => doc! {},
        };
        find_all(&self.service_requests, filter, doc! { "created_at": 1 }).await
    }

    async fn update_service_request_status(
        &self,
        id: &str,
        status: ServiceRequestStatus,
    ) -> Result<Option<ServiceRequest>, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let update = doc! {
            "$set": {
                "status": to_bson(&status)?,
                "updated_at": to_bson(&Utc::now())?,
            }
        };
        Ok(self
            .service_requests
            .find_one_and_update(doc! { "_id": id }, update, options)
            .await?)
    }
}

#[async_trait]
impl BillingStore for MongoStore {
    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .subscriptions
            .find_one(doc! { "user_id": user_id }, None)
            .await?)
    }

    #[tracing::instrument(skip(self, subscription), fields(user_id = %subscription.user_id))]
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let options = UpdateOptions::builder().upsert(true).build();
        let update = doc! {
            "$set": {
                "billing_email": subscription.billing_email.as_str(),
                "recurring_items": to_bson(&subscription.recurring_items)?,
                "monthly_recurring_total": to_bson(&subscription.monthly_recurring_total)?,
                "billing_day": subscription.billing_day,
                "active": subscription.active,
                "updated_at": to_bson(&subscription.updated_at)?,
            },
            // last_invoice_date is written only by the consolidator.
            "$setOnInsert": {
                "_id": subscription.id.as_str(),
                "created_at": to_bson(&subscription.created_at)?,
                "last_invoice_date": to_bson(&subscription.last_invoice_date)?,
            },
        };
        self.subscriptions
            .update_one(
                doc! { "user_id": subscription.user_id.as_str() },
                update,
                options,
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn subscriptions_due(&self, billing_day: i32) -> Result<Vec<Subscription>, StoreError> {
        let start = Instant::now();
        let due = find_all(
            &self.subscriptions,
            doc! { "active": true, "billing_day": billing_day },
            doc! { "user_id": 1 },
        )
        .await;
        timed("subscriptions_due", start);
        due
    }

    async fn record_invoice_date(
        &self,
        subscription_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let at = to_bson(&at)?;
        self.subscriptions
            .update_one(
                doc! { "_id": subscription_id },
                doc! { "$set": { "last_invoice_date": at.clone(), "updated_at": at } },
                None,
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, service), fields(user_id = %service.user_id))]
    async fn insert_pending_service(&self, service: &PendingService) -> Result<(), StoreError> {
        self.pending_services.insert_one(service, None).await?;
        Ok(())
    }

    async fn list_pending_services(
        &self,
        user_id: &str,
        billing_month: Option<&str>,
    ) -> Result<Vec<PendingService>, StoreError> {
        let mut filter = doc! { "user_id": user_id };
        if let Some(month) = billing_month {
            filter.insert("billing_month", month);
        }
        find_all(
            &self.pending_services,
            filter,
            doc! { "service_date": 1, "created_at": 1 },
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn uninvoiced_services(
        &self,
        user_id: &str,
        billing_month: &str,
    ) -> Result<Vec<PendingService>, StoreError> {
        let start = Instant::now();
        let services = find_all(
            &self.pending_services,
            doc! { "user_id": user_id, "billing_month": billing_month, "invoiced": false },
            doc! { "service_date": 1, "created_at": 1 },
        )
        .await;
        timed("uninvoiced_services", start);
        services
    }

    #[tracing::instrument(skip(self, service_ids), fields(count = service_ids.len()))]
    async fn mark_services_invoiced(
        &self,
        service_ids: &[String],
        invoice_id: &str,
    ) -> Result<u64, StoreError> {
        if service_ids.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();
        let result = self
            .pending_services
            .update_many(
                doc! { "_id": { "$in": service_ids.to_vec() }, "invoiced": false },
                doc! { "$set": { "invoiced": true, "invoice_id": invoice_id } },
                None,
            )
            .await;
        timed("mark_services_invoiced", start);
        Ok(result?.modified_count)
    }

    async fn find_invoice(
        &self,
        user_id: &str,
        billing_month: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .invoices
            .find_one(
                doc! { "user_id": user_id, "billing_month": billing_month },
                None,
            )
            .await?)
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, StoreError> {
        Ok(self.invoices.find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, StoreError> {
        find_all(
            &self.invoices,
            doc! { "user_id": user_id },
            doc! { "billing_month": -1 },
        )
        .await
    }

    #[tracing::instrument(skip(self, invoice), fields(user_id = %invoice.user_id, billing_month = %invoice.billing_month))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let start = Instant::now();
        let result = self.invoices.insert_one(invoice, None).await;
        timed("insert_invoice", start);
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate(format!(
                "invoice for {} {}",
                invoice.user_id, invoice.billing_month
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_invoice_finalization(
        &self,
        invoice_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // A null match also covers invoices written before the field existed.
        let result = self
            .invoices
            .update_one(
                doc! { "_id": invoice_id, "finalized_at": null },
                doc! { "$set": { "finalized_at": to_bson(&at)? } },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}
