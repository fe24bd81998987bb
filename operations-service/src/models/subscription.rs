//! Recurring-service subscription.

use super::line_item::ServiceLineItem;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client's recurring services. `monthly_recurring_total` caches the sum of
/// the recurring amounts and is recomputed whenever the items change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub billing_email: String,
    pub recurring_items: Vec<ServiceLineItem>,
    pub monthly_recurring_total: Decimal,
    /// Day of month (1-28) on which the scheduled run bills this client.
    pub billing_day: i32,
    pub active: bool,
    pub last_invoice_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        user_id: String,
        billing_email: String,
        recurring_items: Vec<ServiceLineItem>,
        billing_day: i32,
        active: bool,
    ) -> Self {
        let now = Utc::now();
        let mut subscription = Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            billing_email,
            recurring_items: Vec::new(),
            monthly_recurring_total: Decimal::ZERO,
            billing_day,
            active,
            last_invoice_date: None,
            created_at: now,
            updated_at: now,
        };
        subscription.set_recurring_items(recurring_items);
        subscription
    }

    pub fn set_recurring_items(&mut self, items: Vec<ServiceLineItem>) {
        self.monthly_recurring_total = items.iter().map(|item| item.amount).sum();
        self.recurring_items = items;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn recurring_total_tracks_items() {
        let items = vec![
            ServiceLineItem::new("Weekly cleaning".into(), Decimal::from(4), Decimal::from(25), None),
            ServiceLineItem::new(
                "Window wash".into(),
                Decimal::ONE,
                Decimal::from(30),
                Some(Decimal::from_str("27.50").unwrap()),
            ),
        ];
        let mut subscription =
            Subscription::new("client-1".into(), "a@b.test".into(), items, 1, true);
        assert_eq!(
            subscription.monthly_recurring_total,
            Decimal::from_str("127.50").unwrap()
        );

        subscription.set_recurring_items(Vec::new());
        assert_eq!(subscription.monthly_recurring_total, Decimal::ZERO);
    }
}
