#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use ecommerce_checkout::config::CheckoutConfig;
use ecommerce_checkout::domain::aggregates::{Cart, CartLine, Order, PaymentRecord, Product};
use ecommerce_checkout::domain::value_objects::{Money, OrderId, ProductId, Quantity, UserId};
use ecommerce_checkout::gateway::MockGateway;
use ecommerce_checkout::notify::{Notifier, NotifyError};
use ecommerce_checkout::services::{Backends, EventPublisher, Services};
use ecommerce_checkout::store::memory::MemoryStore;
use ecommerce_checkout::store::{OrderStore, RepositoryError, StockApplication, TransitionCommit};

pub const CLIENT_URL: &str = "http://shop.test";

/// Captures every email instead of sending it.
#[derive(Default)]
pub struct Outbox {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    pub fn subjects(&self) -> Vec<String> { self.sent.lock().unwrap().iter().map(|(_, s)| s.clone()).collect() }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

/// Order store whose next `failures` commits error out without writing,
/// the way a rolled-back transaction leaves the database.
pub struct FlakyCommits {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
}

impl FlakyCommits {
    pub fn new(inner: Arc<MemoryStore>, failures: usize) -> Self { Self { inner, failures: AtomicUsize::new(failures) } }

    pub fn fail_next(&self, failures: usize) { self.failures.store(failures, Ordering::SeqCst); }
}

#[async_trait]
impl OrderStore for FlakyCommits {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> { self.inner.insert(order).await }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> { OrderStore::get(&*self.inner, id).await }

    async fn find_by_preference(&self, preference_id: &str) -> Result<Option<Order>, RepositoryError> {
        self.inner.find_by_preference(preference_id).await
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> { self.inner.list_for_user(user_id).await }

    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError> { self.inner.list_all().await }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<Option<Vec<StockApplication>>, RepositoryError> {
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(RepositoryError::Conflict("transient".to_string()));
        }
        self.inner.commit_transition(commit).await
    }

    async fn record_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<(), RepositoryError> {
        self.inner.record_payment(id, payment).await
    }

    async fn record_pending_payment(&self, id: OrderId, payment: &PaymentRecord) -> Result<bool, RepositoryError> {
        self.inner.record_pending_payment(id, payment).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub outbox: Arc<Outbox>,
    pub services: Services,
}

impl Harness {
    pub fn new() -> Self { Self::with_orders(|store| store) }

    /// Same wiring, with the order seam replaced by `orders(store)`.
    pub fn with_orders<O>(orders: impl FnOnce(Arc<MemoryStore>) -> Arc<O>) -> Self
    where
        O: OrderStore + 'static,
    {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let outbox = Arc::new(Outbox::default());
        let mut backends = Backends::with_store(store.clone(), gateway.clone(), outbox.clone(), EventPublisher::disabled());
        let orders: Arc<dyn OrderStore> = orders(store.clone());
        backends.orders = orders;
        let config = CheckoutConfig {
            public_base_url: CLIENT_URL.to_string(),
            currency: "ARS".to_string(),
            notification_url: Some("http://api.test/api/payments/webhook".to_string()),
        };
        Self { store, gateway, outbox, services: Services::new(backends, config) }
    }

    pub fn product(&self, price: i64, stock: i32) -> ProductId {
        let id = ProductId::new();
        self.store.insert_product(Product {
            id,
            name: format!("Product {stock}"),
            unit_price: Money::new(Decimal::new(price, 0), "ARS"),
            stock,
            updated_at: Utc::now(),
        });
        id
    }

    pub fn stock(&self, id: ProductId) -> i32 { self.store.product(id).map(|p| p.stock).unwrap_or_default() }

    /// A user with an email and a cart holding `lines` of `(product, quantity)`.
    pub fn buyer(&self, lines: &[(ProductId, u32)]) -> UserId {
        let user = UserId::new();
        self.store.insert_user(user, format!("{user}@example.com"));
        let items: Vec<CartLine> = lines
            .iter()
            .map(|(product_id, qty)| CartLine {
                product_id: *product_id,
                quantity: Quantity::new(*qty).unwrap(),
                // Deliberately wrong: checkout must reprice from the product store.
                subtotal: Decimal::ONE,
            })
            .collect();
        self.store.put_cart(Cart { user_id: user, total: Decimal::new(items.len() as i64, 0), items });
        user
    }

    pub async fn order(&self, id: OrderId) -> Order { self.services.lifecycle.get(id).await.unwrap() }

    /// Sum of ledger deltas recorded for one product.
    pub fn ledger_sum(&self, id: ProductId) -> i32 {
        self.store.ledger().iter().filter(|e| e.product_id == id).map(|e| e.delta).sum()
    }
}
