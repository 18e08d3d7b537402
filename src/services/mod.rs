//! Application services: checkout, order lifecycle, stock ledger and event
//! publishing, wired over the store and gateway traits.

pub mod checkout;
pub mod events;
pub mod ledger;
pub mod lifecycle;

pub use checkout::{Checkout, CheckoutSession};
pub use events::EventPublisher;
pub use ledger::StockLedger;
pub use lifecycle::{OrderLifecycle, PaymentOutcome, PaymentSignal, RedirectParams, ResultPage};

use std::sync::Arc;

use crate::config::CheckoutConfig;
use crate::gateway::PaymentGateway;
use crate::notify::{Notifications, Notifier};
use crate::store::{CartStore, OrderStore, ProductStore, UserDirectory};

/// Everything the services are built from.
#[derive(Clone)]
pub struct Backends {
    pub orders: Arc<dyn OrderStore>,
    pub products: Arc<dyn ProductStore>,
    pub carts: Arc<dyn CartStore>,
    pub users: Arc<dyn UserDirectory>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub events: EventPublisher,
}

impl Backends {
    /// All four store seams backed by one store.
    pub fn with_store<S>(store: Arc<S>, gateway: Arc<dyn PaymentGateway>, notifier: Arc<dyn Notifier>, events: EventPublisher) -> Self
    where
        S: OrderStore + ProductStore + CartStore + UserDirectory + 'static,
    {
        Self { orders: store.clone(), products: store.clone(), carts: store.clone(), users: store, gateway, notifier, events }
    }
}

#[derive(Clone)]
pub struct Services {
    pub checkout: Checkout,
    pub lifecycle: OrderLifecycle,
    pub ledger: StockLedger,
}

impl Services {
    pub fn new(backends: Backends, config: CheckoutConfig) -> Self {
        let Backends { orders, products, carts, users, gateway, notifier, events } = backends;
        let notifications = Notifications::new(notifier, users);
        Self {
            checkout: Checkout::new(
                orders.clone(),
                products.clone(),
                carts,
                gateway.clone(),
                notifications.clone(),
                events.clone(),
                config,
            ),
            lifecycle: OrderLifecycle::new(orders, products.clone(), gateway, notifications, events.clone()),
            ledger: StockLedger::new(products, events),
        }
    }
}
