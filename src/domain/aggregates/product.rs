//! Product Aggregate
//!
//! Products are owned by the catalog; checkout only reads the authoritative
//! unit price and the stock count, and changes stock through the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{Money, ProductId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub stock: i32,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of applying a signed delta to a stock count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StockLevel {
    pub stock: i32,
    /// Change actually applied; differs from the request when clamped at zero.
    pub applied: i32,
}

impl StockLevel {
    /// `max(0, current + delta)`, never negative.
    pub fn apply(current: i32, delta: i32) -> Self {
        let current = current.max(0);
        let stock = current.saturating_add(delta).max(0);
        Self { stock, applied: stock - current }
    }
}
