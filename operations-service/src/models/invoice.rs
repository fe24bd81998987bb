//! Monthly invoice model.

use super::line_item::InvoiceLineItem;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
}

/// Billing content is immutable once written. At most one invoice exists per
/// `(user_id, billing_month)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub subscription_id: String,
    pub billing_month: String,
    pub line_items: Vec<InvoiceLineItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub due_date: DateTime<Utc>,
    pub status: InvoiceStatus,
    /// Pending services folded into this invoice, kept so their flags can be
    /// re-applied if the post-insert update fails.
    pub consumed_service_ids: Vec<String>,
    /// Set once the subscription has been stamped and the client emailed.
    /// An invoice left unset after a failed flag update is finished by
    /// settling it.
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
