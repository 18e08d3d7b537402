//! Stock ledger entries
//!
//! Append-only. For every product, initial stock plus the sum of its entry
//! deltas equals the current stock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::value_objects::{OrderId, ProductId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    Sale,
    Cancellation,
    Adjustment,
    Inbound,
}

impl StockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Cancellation => "cancellation",
            Self::Adjustment => "adjustment",
            Self::Inbound => "inbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "sale" => Some(Self::Sale),
            "cancellation" => Some(Self::Cancellation),
            "adjustment" => Some(Self::Adjustment),
            "inbound" => Some(Self::Inbound),
            _ => None,
        }
    }

    /// Reasons a back-office user may record by hand.
    pub fn is_manual(&self) -> bool { matches!(self, Self::Adjustment | Self::Inbound) }
}

impl fmt::Display for StockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A requested change, before clamping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: ProductId,
    pub delta: i32,
    pub reason: StockReason,
    pub actor: Option<UserId>,
    pub order_id: Option<OrderId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub id: Uuid,
    pub product_id: ProductId,
    /// Effective change; negative depletes, positive replenishes.
    pub delta: i32,
    pub reason: StockReason,
    pub actor: Option<UserId>,
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
}

impl StockLedgerEntry {
    pub fn record(change: &StockChange, applied: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            product_id: change.product_id,
            delta: applied,
            reason: change.reason,
            actor: change.actor,
            order_id: change.order_id,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trip() {
        assert_eq!(StockReason::parse("inbound"), Some(StockReason::Inbound));
        assert_eq!(StockReason::parse("venta"), None);
        assert!(StockReason::Adjustment.is_manual());
        assert!(!StockReason::Sale.is_manual());
    }

    #[test]
    fn test_record_keeps_effective_delta() {
        let change = StockChange { product_id: ProductId::new(), delta: -5, reason: StockReason::Sale, actor: None, order_id: None };
        let entry = StockLedgerEntry::record(&change, -2);
        assert_eq!(entry.delta, -2);
        assert_eq!(entry.reason, StockReason::Sale);
    }
}
