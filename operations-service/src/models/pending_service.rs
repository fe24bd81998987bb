//! One-off billable services awaiting consolidation.

use super::line_item::ServiceLineItem;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Created when work is logged; flips to `invoiced` exactly once, when an
/// invoice for its billing month consumes it. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingService {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
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

impl PendingService {
    pub fn new(
        user_id: String,
        item: ServiceLineItem,
        service_date: NaiveDate,
        billing_month: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
            amount: item.amount,
            service_date,
            billing_month,
            invoiced: false,
            invoice_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn line_item(&self) -> ServiceLineItem {
        ServiceLineItem {
            description: self.description.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            amount: self.amount,
        }
    }
}
