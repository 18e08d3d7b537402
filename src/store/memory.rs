//! In-process store used in demo mode (no `DATABASE_URL`) and by tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{CartStore, OrderStore, ProductStore, RepositoryError, StockApplication, TransitionCommit, UserDirectory};
use crate::domain::aggregates::{
    Cart, Order, OrderRecord, OrderStatus, PaymentRecord, Product, StockChange, StockLedgerEntry, StockLevel,
};
use crate::domain::value_objects::{OrderId, ProductId, UserId};

#[derive(Default)]
struct State {
    /// Insertion order doubles as creation order.
    orders: Vec<OrderRecord>,
    products: HashMap<ProductId, Product>,
    ledger: Vec<StockLedgerEntry>,
    carts: HashMap<UserId, Cart>,
    users: HashMap<UserId, String>,
}

impl State {
    fn apply_stock_change(&mut self, change: &StockChange) -> StockApplication {
        let product = self.products.get_mut(&change.product_id)?;
        let level = StockLevel::apply(product.stock, change.delta);
        product.stock = level.stock;
        product.updated_at = Utc::now();
        let product = product.clone();
        let entry = StockLedgerEntry::record(change, level.applied);
        self.ledger.push(entry.clone());
        Some((product, entry))
    }

    fn write_payment(&mut self, id: OrderId, payment: &PaymentRecord, only_while: Option<OrderStatus>) -> bool {
        match self.orders.iter_mut().find(|o| o.id == id) {
            Some(order) if only_while.map_or(true, |status| order.status == status) => {
                order.payment = payment.clone();
                order.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

/// Every operation holds one lock over the whole state, so multi-row writes
/// such as [`OrderStore::commit_transition`] are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_product(&self, product: Product) { self.state().products.insert(product.id, product); }

    pub fn remove_product(&self, id: ProductId) { self.state().products.remove(&id); }

    pub fn put_cart(&self, cart: Cart) { self.state().carts.insert(cart.user_id, cart); }

    pub fn insert_user(&self, id: UserId, email: impl Into<String>) { self.state().users.insert(id, email.into()); }

    pub fn product(&self, id: ProductId) -> Option<Product> { self.state().products.get(&id).cloned() }

    pub fn cart(&self, user_id: UserId) -> Option<Cart> { self.state().carts.get(&user_id).cloned() }

    /// Every ledger entry, oldest first.
    pub fn ledger(&self) -> Vec<StockLedgerEntry> { self.state().ledger.clone() }

    pub fn order_count(&self) -> usize { self.state().orders.len() }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut state = self.state();
        if let Some(pref) = order.preference_id() {
            if state.orders.iter().any(|o| o.preference_id.as_deref() == Some(pref)) {
                return Err(RepositoryError::Conflict(format!("preference {pref} already has an order")));
            }
        }
        state.orders.push(OrderRecord::from(order));
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.state().orders.iter().find(|o| o.id == id).cloned().map(Order::from))
    }

    async fn find_by_preference(&self, preference_id: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .state()
            .orders
            .iter()
            .find(|o| o.preference_id.as_deref() == Some(preference_id))
            .cloned()
            .map(Order::from))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        Ok(self.state().orders.iter().rev().filter(|o| o.user_id == user_id).cloned().map(Order::from).collect())
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError> {
        Ok(self.state().orders.iter().rev().cloned().map(Order::from).collect())
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<Option<Vec<StockApplication>>, RepositoryError> {
        let mut state = self.state();
        match state.orders.iter_mut().find(|o| o.id == commit.order_id) {
            Some(order) if order.status == commit.from => {
                order.status = commit.to;
                order.updated_at = Utc::now();
            }
            _ => return Ok(None),
        }
        let applied = commit.stock.iter().map(|change| state.apply_stock_change(change)).collect();
        if let Some(user_id) = commit.clear_cart {
            state.carts.insert(user_id, Cart::empty(user_id));
        }
        Ok(Some(applied))
    }

    async fn record_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<(), RepositoryError> {
        self.state().write_payment(id, payment, None);
        Ok(())
    }

    async fn record_pending_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<bool, RepositoryError> {
        Ok(self.state().write_payment(id, payment, Some(OrderStatus::Pending)))
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.product(id))
    }

    async fn apply_stock_change(&self, change: &StockChange) -> Result<StockApplication, RepositoryError> {
        Ok(self.state().apply_stock_change(change))
    }

    async fn history(&self, id: ProductId) -> Result<Vec<StockLedgerEntry>, RepositoryError> {
        Ok(self.state().ledger.iter().rev().filter(|e| e.product_id == id).cloned().collect())
    }

    async fn entries_for_order(&self, order_id: OrderId) -> Result<Vec<StockLedgerEntry>, RepositoryError> {
        Ok(self.state().ledger.iter().filter(|e| e.order_id == Some(order_id)).cloned().collect())
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn get(&self, user_id: UserId) -> Result<Cart, RepositoryError> {
        Ok(self.cart(user_id).unwrap_or_else(|| Cart::empty(user_id)))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn email(&self, user_id: UserId) -> Result<Option<String>, RepositoryError> {
        Ok(self.state().users.get(&user_id).cloned())
    }
}
