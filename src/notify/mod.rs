//! Best-effort transactional email.
//!
//! Nothing in here may fail an order or stock operation: [`Notifications`]
//! logs delivery problems and returns `()`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MailConfig;
use crate::domain::aggregates::{Order, OrderStatus};
use crate::store::UserDirectory;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("invalid mail configuration: {0}")]
    Config(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError>;
}

/// Posts `{from, to, subject, html}` to a transactional mail API.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    from: String,
}

#[derive(Serialize)]
struct MailBody<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

impl HttpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, NotifyError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.expose_secret());
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&auth).map_err(|e| NotifyError::Config(e.to_string()))?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { client, api_url: config.api_url.clone(), from: config.from.clone() })
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
        let body = MailBody { from: &self.from, to, subject, html };
        let response = self.client.post(&self.api_url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api { status, message });
        }
        Ok(())
    }
}

/// Writes the message to the log instead of sending it.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<(), NotifyError> {
        info!(to, subject, "Email (log only)");
        Ok(())
    }
}

/// Order emails, addressed through the user directory.
#[derive(Clone)]
pub struct Notifications {
    notifier: Arc<dyn Notifier>,
    users: Arc<dyn UserDirectory>,
}

impl Notifications {
    pub fn new(notifier: Arc<dyn Notifier>, users: Arc<dyn UserDirectory>) -> Self { Self { notifier, users } }

    pub async fn order_created(&self, order: &Order) {
        let subject = format!("We received your order #{}", order.id());
        let html = format!(
            "<h1>Thanks for your order</h1>{}<p>Total: <strong>{}</strong></p><p>We will let you know once the payment is confirmed.</p>",
            render_items(order),
            order.total()
        );
        self.deliver(order, &subject, &html).await;
    }

    /// Sent when a payment signal moves the order to `paid`.
    pub async fn payment_result(&self, order: &Order) {
        let subject = format!("Payment confirmed for order #{}", order.id());
        let html = format!(
            "<h1>Payment confirmed</h1>{}<p>Total paid: <strong>{}</strong></p><p>Payment id: {}</p>",
            render_items(order),
            order.total(),
            order.payment().payment_id.as_deref().unwrap_or("-")
        );
        self.deliver(order, &subject, &html).await;
    }

    pub async fn status_changed(&self, order: &Order) {
        let subject = format!("Order #{} is now {}", order.id(), status_label(order.status()));
        let html = format!(
            "<h1>Order update</h1><p>Your order is now <strong>{}</strong>.</p>{}",
            status_label(order.status()),
            render_items(order)
        );
        self.deliver(order, &subject, &html).await;
    }

    async fn deliver(&self, order: &Order, subject: &str, html: &str) {
        let to = match self.users.email(order.user_id()).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                warn!(order_id = %order.id(), user_id = %order.user_id(), "No email on file, notification skipped");
                return;
            }
            Err(e) => {
                warn!(order_id = %order.id(), error = %e, "Recipient lookup failed, notification skipped");
                return;
            }
        };
        if let Err(e) = self.notifier.send(&to, subject, html).await {
            warn!(order_id = %order.id(), error = %e, "Notification failed");
        }
    }
}

fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending payment",
        OrderStatus::Paid => "paid",
        OrderStatus::Prepared => "being prepared",
        OrderStatus::Shipped => "shipped",
        OrderStatus::AtDistributor => "at the distributor",
        OrderStatus::Delivered => "delivered",
        OrderStatus::Cancelled => "cancelled",
    }
}

fn render_items(order: &Order) -> String {
    let rows: String = order
        .items()
        .iter()
        .map(|i| format!("<li>{} x {} = {}</li>", i.quantity.value(), escape(&i.title), i.subtotal))
        .collect();
    format!("<ul>{rows}</ul>")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::LineItem;
    use crate::domain::value_objects::{Money, ProductId, Quantity, UserId};
    use crate::store::memory::MemoryStore;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Outbox {
        async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Api { status: 500, message: "down".into() });
            }
            self.sent.lock().unwrap().push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    fn order(user: UserId) -> Order {
        let item = LineItem::new(ProductId::new(), "Yerba <1kg>", Quantity::new(2).unwrap(), Money::new(Decimal::new(10, 0), "ARS"));
        Order::create(user, vec![item], "mercadopago").unwrap()
    }

    #[tokio::test]
    async fn test_order_created_is_addressed_to_owner() {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::new();
        store.insert_user(user, "buyer@example.com");
        let outbox = Arc::new(Outbox::default());
        let notifications = Notifications::new(outbox.clone(), store);

        notifications.order_created(&order(user)).await;

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "buyer@example.com");
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::new();
        store.insert_user(user, "buyer@example.com");
        let outbox = Arc::new(Outbox { fail: true, ..Default::default() });
        Notifications::new(outbox, store.clone()).status_changed(&order(user)).await;

        // Unknown recipient is skipped as well.
        Notifications::new(Arc::new(LogNotifier), store).payment_result(&order(UserId::new())).await;
    }

    #[test]
    fn test_items_are_escaped() {
        let html = render_items(&order(UserId::new()));
        assert!(html.contains("Yerba &lt;1kg&gt;"));
    }
}
