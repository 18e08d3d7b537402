//! Cart Aggregate
//!
//! Read-only snapshot of a user's cart as the cart service keeps it. Checkout
//! prices line items from the product store, not from these subtotals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{ProductId, Quantity, UserId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    pub items: Vec<CartLine>,
    pub total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub subtotal: Decimal,
}

impl Cart {
    pub fn empty(user_id: UserId) -> Self { Self { user_id, items: vec![], total: Decimal::ZERO } }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn item_count(&self) -> usize { self.items.len() }
}
