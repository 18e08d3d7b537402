//! Domain events
use crate::domain::aggregates::{OrderStatus, StockReason};
use crate::domain::value_objects::{OrderId, ProductId, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Stock(StockEvent),
}

impl DomainEvent {
    /// Subject suffix used when publishing.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Created { .. }) => "order.created",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Stock(StockEvent::Adjusted { .. }) => "stock.adjusted",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: OrderId, user_id: UserId, total: Decimal },
    Paid { order_id: OrderId, payment_id: Option<String> },
    StatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus },
    Cancelled { order_id: OrderId, stock_restored: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StockEvent {
    Adjusted { product_id: ProductId, delta: i32, stock: i32, reason: StockReason },
}
