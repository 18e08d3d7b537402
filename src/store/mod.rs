//! Persistence seams.
//!
//! The services talk to these traits only. [`postgres`] backs them with
//! PostgreSQL, [`memory`] with in-process maps for demo mode and tests.
//! Both must honour the same two atomicity rules:
//!
//! - [`OrderStore::commit_transition`] is a compare-and-swap on the order
//!   status that lands together with its stock changes and cart clear, or
//!   not at all.
//! - [`ProductStore::apply_stock_change`] reads, clamps, writes the stock and
//!   appends the ledger entry as one step.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::aggregates::{Cart, Order, OrderStatus, PaymentRecord, Product, StockChange, StockLedgerEntry};
use crate::domain::value_objects::{OrderId, ProductId, UserId};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("data corruption: {0}")]
    DataCorruption(String),
}

/// Outcome of one stock change: `None` when the product no longer exists.
pub type StockApplication = Option<(Product, StockLedgerEntry)>;

/// A status swap and every write that must land with it.
#[derive(Clone, Debug)]
pub struct TransitionCommit {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Applied in order, each with the clamping rules of
    /// [`ProductStore::apply_stock_change`].
    pub stock: Vec<StockChange>,
    /// Removes every item of this user's cart and resets its total to zero.
    pub clear_cart: Option<UserId>,
}

impl TransitionCommit {
    pub fn new(order_id: OrderId, from: OrderStatus, to: OrderStatus) -> Self {
        Self { order_id, from, to, stock: Vec::new(), clear_cart: None }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order with its line items.
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn find_by_preference(&self, preference_id: &str) -> Result<Option<Order>, RepositoryError>;

    /// Newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError>;

    /// Newest first.
    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError>;

    /// Moves the order from `commit.from` to `commit.to`, applies the stock
    /// changes and clears the cart in one unit.
    ///
    /// Returns `None`, with nothing written, when the status no longer matches
    /// (another task won) or the order does not exist. Otherwise one
    /// [`StockApplication`] per requested change, in the same order.
    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<Option<Vec<StockApplication>>, RepositoryError>;

    /// Overwrites the raw gateway fields without touching the status.
    async fn record_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<(), RepositoryError>;

    /// Overwrites the raw gateway fields only while the order is `pending`.
    /// Returns whether anything was written.
    async fn record_pending_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Applies `max(0, stock + delta)` and appends a ledger entry with the
    /// effective delta. Returns `None` if the product does not exist.
    async fn apply_stock_change(&self, change: &StockChange) -> Result<StockApplication, RepositoryError>;

    /// Ledger entries of one product, newest first.
    async fn history(&self, id: ProductId) -> Result<Vec<StockLedgerEntry>, RepositoryError>;

    /// Ledger entries written on behalf of one order, oldest first.
    async fn entries_for_order(&self, order_id: OrderId) -> Result<Vec<StockLedgerEntry>, RepositoryError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// A user without a cart gets an empty one.
    async fn get(&self, user_id: UserId) -> Result<Cart, RepositoryError>;
}

/// Read side of the identity provider, used to address notifications.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn email(&self, user_id: UserId) -> Result<Option<String>, RepositoryError>;
}
