//! Billable line items.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A billable line. `amount` is stored as given and is not re-derived from
/// `quantity * unit_price`, so manual overrides survive consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

impl ServiceLineItem {
    /// Build a line, deriving the amount only when none is supplied.
    pub fn new(
        description: String,
        quantity: Decimal,
        unit_price: Decimal,
        amount: Option<Decimal>,
    ) -> Self {
        Self {
            amount: amount.unwrap_or(quantity * unit_price),
            description,
            quantity,
            unit_price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemSource {
    Recurring,
    OneTime,
}

/// Snapshot of a line as it appears on an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub source: LineItemSource,
}

impl InvoiceLineItem {
    pub fn from_item(item: &ServiceLineItem, source: LineItemSource) -> Self {
        Self {
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            amount: item.amount,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn amount_is_derived_only_when_missing() {
        let derived = ServiceLineItem::new("Lawn".into(), dec("2"), dec("40.00"), None);
        assert_eq!(derived.amount, dec("80.00"));

        let overridden = ServiceLineItem::new("Lawn".into(), dec("2"), dec("40.00"), Some(dec("75")));
        assert_eq!(overridden.amount, dec("75"));
    }
}
