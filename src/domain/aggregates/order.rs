//! Order Aggregate
//!
//! An order is the financial record of one checkout attempt. Line items and the
//! total are captured at creation time and never recomputed from live prices.
//!
//! Status lifecycle:
//!
//! ```text
//! pending -> paid -> prepared -> shipped -> at_distributor -> delivered
//!    \________\_________\__________\______________\-----> cancelled
//! ```
//!
//! `pending -> paid` only happens on an approved payment signal and deducts
//! stock. Cancelling an order whose stock was already deducted restores it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, OrderId, ProductId, Quantity, UserId};

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<LineItem>,
    total: Money,
    status: OrderStatus,
    payment_method: String,
    preference_id: Option<String>,
    #[serde(flatten)]
    payment: PaymentRecord,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub title: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl LineItem {
    pub fn new(product_id: ProductId, title: impl Into<String>, quantity: Quantity, unit_price: Money) -> Self {
        let subtotal = unit_price.multiply(quantity);
        Self { product_id, title: title.into(), quantity, unit_price, subtotal }
    }
}

/// Gateway-side view of the payment, kept raw for audit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: Option<String>,
    pub gateway_status: Option<String>,
    pub gateway_payload: Option<serde_json::Value>,
}

/// Everything a store needs to rehydrate an [`Order`].
#[derive(Clone, Debug)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_method: String,
    pub preference_id: Option<String>,
    pub payment: PaymentRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Prepared,
    Shipped,
    AtDistributor,
    Delivered,
    Cancelled,
}

/// Who is asking for a status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// Redirect callback or webhook reporting a gateway payment.
    Payment,
    /// Privileged back-office caller.
    Administrator,
}

/// Stock side effect attached to a status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockEffect {
    None,
    Deduct,
    Restore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub stock: StockEffect,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        Self::Pending,
        Self::Paid,
        Self::Prepared,
        Self::Shipped,
        Self::AtDistributor,
        Self::Delivered,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Prepared => "prepared",
            Self::Shipped => "shipped",
            Self::AtDistributor => "at_distributor",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self, OrderError> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == value.trim())
            .ok_or_else(|| OrderError::InvalidStatus(value.to_string()))
    }

    /// Position along the fulfilment path; `None` for `cancelled`.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Paid => Some(1),
            Self::Prepared => Some(2),
            Self::Shipped => Some(3),
            Self::AtDistributor => Some(4),
            Self::Delivered => Some(5),
            Self::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// True once stock has been deducted for the order.
    pub fn stock_committed(&self) -> bool {
        matches!(self, Self::Paid | Self::Prepared | Self::Shipped | Self::AtDistributor | Self::Delivered)
    }

    /// Validates `self -> to` for the given origin and returns the stock effect.
    pub fn transition(self, to: OrderStatus, origin: TransitionOrigin) -> Result<StockEffect, OrderError> {
        if self == to { return Err(OrderError::Unchanged(self)); }
        if self.is_terminal() { return Err(OrderError::Terminal(self)); }

        match (to, origin) {
            (Self::Cancelled, _) => Ok(if self.stock_committed() { StockEffect::Restore } else { StockEffect::None }),
            (Self::Paid, TransitionOrigin::Payment) if self == Self::Pending => Ok(StockEffect::Deduct),
            (Self::Paid, TransitionOrigin::Administrator) => Err(OrderError::RequiresPayment),
            (_, TransitionOrigin::Administrator) if self.stock_committed() && to.rank() > self.rank() => Ok(StockEffect::None),
            _ => Err(OrderError::InvalidTransition { from: self, to }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl Order {
    pub fn create(user_id: UserId, items: Vec<LineItem>, payment_method: impl Into<String>) -> Result<Self, OrderError> {
        let first = items.first().ok_or(OrderError::NoItems)?;
        let total = items
            .iter()
            .try_fold(Money::zero(first.subtotal.currency()), |acc, i| acc.add(&i.subtotal))
            .map_err(|_| OrderError::CurrencyMismatch)?;
        let now = Utc::now();
        let mut order = Self {
            id: OrderId::new(), user_id, items, total, status: OrderStatus::Pending,
            payment_method: payment_method.into(), preference_id: None, payment: PaymentRecord::default(),
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created { order_id: order.id, user_id, total: order.total.amount() }));
        Ok(order)
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn user_id(&self) -> UserId { self.user_id }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn total(&self) -> &Money { &self.total }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_method(&self) -> &str { &self.payment_method }
    pub fn preference_id(&self) -> Option<&str> { self.preference_id.as_deref() }
    pub fn payment(&self) -> &PaymentRecord { &self.payment }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn attach_preference(&mut self, preference_id: impl Into<String>) {
        self.preference_id = Some(preference_id.into());
        self.touch();
    }

    /// Raw gateway fields are overwritten on every signal, whatever the status.
    pub fn record_payment(&mut self, payment: PaymentRecord) {
        self.payment = payment;
        self.touch();
    }

    pub fn plan(&self, to: OrderStatus, origin: TransitionOrigin) -> Result<Transition, OrderError> {
        let stock = self.status.transition(to, origin)?;
        Ok(Transition { from: self.status, to, stock })
    }

    /// Applies a transition that the store already committed.
    pub fn apply(&mut self, transition: &Transition) {
        self.status = transition.to;
        self.touch();
        let order_id = self.id;
        let event = match transition.to {
            OrderStatus::Paid => OrderEvent::Paid { order_id, payment_id: self.payment.payment_id.clone() },
            OrderStatus::Cancelled => OrderEvent::Cancelled { order_id, stock_restored: transition.stock == StockEffect::Restore },
            to => OrderEvent::StatusChanged { order_id, from: transition.from, to },
        };
        self.raise_event(DomainEvent::Order(event));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

impl From<OrderRecord> for Order {
    fn from(r: OrderRecord) -> Self {
        Self {
            id: r.id, user_id: r.user_id, items: r.items, total: r.total, status: r.status,
            payment_method: r.payment_method, preference_id: r.preference_id, payment: r.payment,
            created_at: r.created_at, updated_at: r.updated_at, events: vec![],
        }
    }
}

impl From<&Order> for OrderRecord {
    fn from(o: &Order) -> Self {
        Self {
            id: o.id, user_id: o.user_id, items: o.items.clone(), total: o.total.clone(), status: o.status,
            payment_method: o.payment_method.clone(), preference_id: o.preference_id.clone(), payment: o.payment.clone(),
            created_at: o.created_at, updated_at: o.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("line items use different currencies")]
    CurrencyMismatch,
    #[error("unknown order status '{0}'")]
    InvalidStatus(String),
    #[error("order is already {0}")]
    Unchanged(OrderStatus),
    #[error("order is {0} and can no longer change")]
    Terminal(OrderStatus),
    #[error("only an approved payment can mark an order as paid")]
    RequiresPayment,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}
