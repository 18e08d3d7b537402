//! Checkout: turns the caller's cart into a priced `pending` order.
//!
//! Prices always come from the product store at the moment of checkout. The
//! cart is only read here; it is cleared once the order is paid.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::CheckoutConfig;
use crate::domain::aggregates::{Cart, LineItem, Order};
use crate::domain::value_objects::{OrderId, UserId};
use crate::gateway::{BackUrls, PaymentGateway, PaymentMetadata, PreferenceItem, PreferenceRequest};
use crate::notify::Notifications;
use crate::services::events::EventPublisher;
use crate::services::lifecycle::ResultPage;
use crate::store::{CartStore, OrderStore, ProductStore};
use crate::{EcommerceError, Result};

pub const GATEWAY_PAYMENT_METHOD: &str = "mercadopago";

/// What the storefront needs to send the buyer to the hosted checkout.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutSession {
    /// Gateway preference id.
    pub id: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
    pub order_id: OrderId,
}

#[derive(Clone)]
pub struct Checkout {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    carts: Arc<dyn CartStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Notifications,
    events: EventPublisher,
    config: CheckoutConfig,
}

impl Checkout {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        products: Arc<dyn ProductStore>,
        carts: Arc<dyn CartStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Notifications,
        events: EventPublisher,
        config: CheckoutConfig,
    ) -> Self {
        Self { orders, products, carts, gateway, notifications, events, config }
    }

    /// Creates a gateway preference for the caller's cart and persists the
    /// matching `pending` order. Nothing is persisted if the gateway fails.
    #[instrument(skip(self))]
    pub async fn create_preference(&self, user_id: UserId) -> Result<CheckoutSession> {
        let cart = self.carts.get(user_id).await?;
        let mut order = Order::create(user_id, self.price(&cart).await?, GATEWAY_PAYMENT_METHOD)?;

        let request = self.preference_request(&order);
        let preference = self.gateway.create_preference(&request).await.map_err(|e| {
            error!(order_id = %order.id(), error = %e, "Preference creation failed, order discarded");
            EcommerceError::PreferenceCreation(e)
        })?;

        order.attach_preference(preference.id.clone());
        self.orders.insert(&order).await?;
        info!(order_id = %order.id(), preference_id = %preference.id, total = %order.total(), "Checkout order created");

        self.events.publish_all(order.take_events()).await;
        self.notifications.order_created(&order).await;

        Ok(CheckoutSession {
            id: preference.id,
            init_point: preference.init_point,
            sandbox_init_point: preference.sandbox_init_point,
            order_id: order.id(),
        })
    }

    /// Records a `pending` order for an off-gateway payment method.
    #[instrument(skip(self))]
    pub async fn create_order(&self, user_id: UserId, payment_method: &str) -> Result<Order> {
        let payment_method = payment_method.trim();
        if payment_method.is_empty() {
            return Err(EcommerceError::Validation("payment method must not be empty".to_string()));
        }
        let cart = self.carts.get(user_id).await?;
        let mut order = Order::create(user_id, self.price(&cart).await?, payment_method)?;

        self.orders.insert(&order).await?;
        info!(order_id = %order.id(), payment_method, total = %order.total(), "Manual order created");

        self.events.publish_all(order.take_events()).await;
        self.notifications.order_created(&order).await;
        Ok(order)
    }

    /// Snapshots the cart into line items at the current catalog price.
    async fn price(&self, cart: &Cart) -> Result<Vec<LineItem>> {
        if cart.is_empty() {
            return Err(EcommerceError::EmptyCart);
        }
        let mut items = Vec::with_capacity(cart.item_count());
        for line in &cart.items {
            let product = self
                .products
                .get(line.product_id)
                .await?
                .ok_or(EcommerceError::ProductUnavailable(line.product_id))?;
            items.push(LineItem::new(product.id, product.name, line.quantity, product.unit_price));
        }
        Ok(items)
    }

    fn preference_request(&self, order: &Order) -> PreferenceRequest {
        let base = &self.config.public_base_url;
        let back_url = |page: ResultPage| format!("{base}/{}", page.path());
        PreferenceRequest {
            items: order
                .items()
                .iter()
                .map(|i| PreferenceItem {
                    title: i.title.clone(),
                    quantity: i.quantity.value(),
                    unit_price: i.unit_price.amount(),
                    currency_id: self.config.currency.clone(),
                })
                .collect(),
            back_urls: BackUrls {
                success: back_url(ResultPage::Success),
                failure: back_url(ResultPage::Failure),
                pending: back_url(ResultPage::Pending),
            },
            external_reference: order.id().to_string(),
            metadata: PaymentMetadata { order_id: Some(order.id().to_string()), user_id: Some(order.user_id().to_string()) },
            notification_url: self.config.notification_url.clone(),
        }
    }
}
