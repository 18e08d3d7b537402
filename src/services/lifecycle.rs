//! Order lifecycle.
//!
//! Every status change goes through [`OrderStore::commit_transition`], a
//! compare-and-swap on the stored status that carries the stock side effects
//! and the cart clear with it. A lost swap writes nothing, so duplicate or
//! concurrent payment signals for one order deduct stock exactly once, and a
//! failed commit leaves the order `pending` for the next delivery.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::domain::aggregates::{
    Order, OrderError, OrderStatus, PaymentRecord, StockChange, StockEffect, StockReason, Transition, TransitionOrigin,
};
use crate::domain::value_objects::{OrderId, UserId};
use crate::gateway::{GatewayError, GatewayPaymentStatus, PaymentDetails, PaymentGateway};
use crate::notify::Notifications;
use crate::services::events::EventPublisher;
use crate::services::ledger::StockLedger;
use crate::store::{OrderStore, ProductStore, RepositoryError, StockApplication, TransitionCommit};
use crate::{EcommerceError, Result};

/// A lost compare-and-swap is retried against the freshly loaded order.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// One payment report, from the redirect or from the webhook.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentSignal {
    pub payment_id: Option<String>,
    pub status: GatewayPaymentStatus,
    pub payload: Option<serde_json::Value>,
}

impl PaymentSignal {
    fn record(&self) -> PaymentRecord {
        PaymentRecord {
            payment_id: self.payment_id.clone(),
            gateway_status: Some(self.status.as_str().to_string()),
            gateway_payload: self.payload.clone(),
        }
    }
}

impl From<PaymentDetails> for PaymentSignal {
    fn from(details: PaymentDetails) -> Self {
        Self { payment_id: Some(details.id), status: details.status, payload: Some(details.raw) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// This signal moved the order to `paid` and deducted stock.
    Confirmed,
    /// The order was already past `pending`; only the raw fields were updated.
    AlreadySettled(OrderStatus),
    /// Payment not approved (yet); the order keeps waiting in `pending`.
    Waiting,
    /// Nothing in this system matched the signal.
    Ignored,
}

/// Query of the browser redirect that ends a hosted checkout.
#[derive(Clone, Debug, Default)]
pub struct RedirectParams {
    pub payment_id: Option<String>,
    pub status: Option<String>,
    pub preference_id: Option<String>,
}

/// Storefront page the buyer lands on after the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultPage {
    Success,
    Failure,
    Pending,
}

impl ResultPage {
    /// `approved` is a success; rejected, cancelled, `null` or missing is a failure.
    pub fn for_status(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            Some("approved") => Self::Success,
            None | Some("") | Some("null") | Some("rejected") | Some("cancelled") => Self::Failure,
            Some(_) => Self::Pending,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Success => "checkout-success",
            Self::Failure => "checkout-failure",
            Self::Pending => "checkout-pending",
        }
    }
}

#[derive(Clone)]
pub struct OrderLifecycle {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: StockLedger,
    notifications: Notifications,
    events: EventPublisher,
}

impl OrderLifecycle {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        products: Arc<dyn ProductStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Notifications,
        events: EventPublisher,
    ) -> Self {
        let ledger = StockLedger::new(products.clone(), events.clone());
        Self { orders, products, gateway, ledger, notifications, events }
    }

    pub async fn get(&self, id: OrderId) -> Result<Order> {
        self.orders.get(id).await?.ok_or_else(|| EcommerceError::OrderNotFound(id.to_string()))
    }

    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> { Ok(self.orders.list_for_user(user_id).await?) }

    pub async fn all_orders(&self) -> Result<Vec<Order>> { Ok(self.orders.list_all().await?) }

    /// Shared entry point of both verified payment signals.
    ///
    /// The raw gateway fields are always overwritten. Stock is deducted and
    /// the cart cleared only by the signal that wins the `pending -> paid` swap.
    #[instrument(skip(self, signal), fields(payment_id = ?signal.payment_id, status = signal.status.as_str()))]
    pub async fn confirm_payment(&self, order_id: OrderId, signal: PaymentSignal) -> Result<PaymentOutcome> {
        let record = signal.record();
        self.orders.record_payment(order_id, &record).await?;

        if !signal.status.is_approved() {
            let order = self.get(order_id).await?;
            info!(order_status = %order.status(), "Payment not approved, order keeps waiting");
            return Ok(PaymentOutcome::Waiting);
        }

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let mut order = self.get(order_id).await?;
            let transition = match order.plan(OrderStatus::Paid, TransitionOrigin::Payment) {
                Ok(t) => t,
                Err(e @ (OrderError::Unchanged(_) | OrderError::InvalidTransition { .. } | OrderError::Terminal(_))) => {
                    if order.status() == OrderStatus::Cancelled {
                        warn!(error = %e, "Approved payment for a cancelled order");
                    } else {
                        info!(order_status = %order.status(), "Duplicate payment signal, already settled");
                    }
                    return Ok(PaymentOutcome::AlreadySettled(order.status()));
                }
                Err(e) => return Err(e.into()),
            };

            let buyer = order.user_id();
            let mut commit = self.plan_commit(&order, &transition, buyer).await?;
            commit.clear_cart = Some(buyer);
            let Some(applied) = self.orders.commit_transition(&commit).await? else {
                continue;
            };

            self.report_stock(&commit, &applied).await;
            order.record_payment(record.clone());
            order.apply(&transition);
            info!("Order paid");
            self.publish(&mut order).await;
            self.notifications.payment_result(&order).await;
            return Ok(PaymentOutcome::Confirmed);
        }

        Err(RepositoryError::Conflict(format!("order {order_id} kept changing during payment confirmation")).into())
    }

    /// Browser redirect after checkout. Never fails: internal problems are
    /// logged and the buyer is sent to the pending page.
    #[instrument(skip(self, params), fields(preference_id = ?params.preference_id, status = ?params.status))]
    pub async fn handle_redirect(&self, params: &RedirectParams) -> ResultPage {
        let page = ResultPage::for_status(params.status.as_deref());
        let Some(preference_id) = params.preference_id.as_deref().filter(|p| !p.trim().is_empty()) else {
            warn!("Redirect without preference id");
            return ResultPage::Failure;
        };

        let order = match self.orders.find_by_preference(preference_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!("No order for preference, nothing to update");
                return page;
            }
            Err(e) => {
                warn!(error = %e, "Order lookup failed on redirect");
                return ResultPage::Pending;
            }
        };

        let payment_id = params.payment_id.as_deref().map(str::trim).filter(|p| !p.is_empty() && *p != "null");
        match (page, payment_id) {
            (ResultPage::Success, Some(payment_id)) => self.verify_redirect(&order, payment_id).await,
            (ResultPage::Success, None) => {
                warn!("Approved redirect without payment id");
                ResultPage::Pending
            }
            (_, payment_id) => {
                // The token is unverified: kept for audit only while the order still waits.
                let signal = PaymentSignal {
                    payment_id: payment_id.map(String::from),
                    status: GatewayPaymentStatus::parse(params.status.as_deref().unwrap_or("null")),
                    payload: Some(json!({
                        "source": "redirect",
                        "payment_id": params.payment_id,
                        "status": params.status,
                        "preference_id": params.preference_id,
                    })),
                };
                match self.orders.record_pending_payment(order.id(), &signal.record()).await {
                    Ok(true) => info!(order_id = %order.id(), "Redirect status recorded"),
                    Ok(false) => info!(order_id = %order.id(), "Order already settled, redirect status not recorded"),
                    Err(e) => {
                        warn!(order_id = %order.id(), error = %e, "Could not record redirect status");
                        return ResultPage::Pending;
                    }
                }
                page
            }
        }
    }

    /// An `approved` redirect: approval and ownership are taken from the gateway.
    async fn verify_redirect(&self, order: &Order, payment_id: &str) -> ResultPage {
        let details = match self.gateway.get_payment(payment_id).await {
            Ok(details) => details,
            Err(e) => {
                warn!(error = %e, "Could not verify approved payment, leaving it to the webhook");
                return ResultPage::Pending;
            }
        };
        let order_id = order.id().to_string();
        if details.order_reference() != Some(order_id.as_str()) {
            warn!(
                %order_id,
                payment_id = %details.id,
                reference = ?details.order_reference(),
                "Redirected payment belongs to another order"
            );
            return ResultPage::Failure;
        }

        let signal = PaymentSignal::from(details);
        let verified_page = ResultPage::for_status(Some(signal.status.as_str()));
        match self.confirm_payment(order.id(), signal).await {
            Ok(PaymentOutcome::AlreadySettled(OrderStatus::Cancelled)) => ResultPage::Failure,
            Ok(_) => verified_page,
            Err(e) => {
                warn!(%order_id, error = %e, "Payment confirmation failed on redirect");
                ResultPage::Pending
            }
        }
    }

    /// Webhook delivery for one payment id.
    ///
    /// Gateway failures are returned so the caller answers with an error and
    /// the gateway retries. Payments that do not point at one of our orders
    /// are acknowledged as [`PaymentOutcome::Ignored`].
    #[instrument(skip(self))]
    pub async fn handle_webhook(&self, payment_id: &str) -> Result<PaymentOutcome> {
        let details = match self.gateway.get_payment(payment_id).await {
            Ok(details) => details,
            Err(GatewayError::PaymentNotFound(_)) => {
                warn!("Webhook for unknown payment, ignoring");
                return Ok(PaymentOutcome::Ignored);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(reference) = details.order_reference() else {
            info!("Payment carries no order reference, ignoring");
            return Ok(PaymentOutcome::Ignored);
        };
        let Some(order_id) = OrderId::parse(reference) else {
            info!(reference, "Payment references an unknown order format, ignoring");
            return Ok(PaymentOutcome::Ignored);
        };
        if self.orders.get(order_id).await?.is_none() {
            info!(%order_id, "Payment references no known order, ignoring");
            return Ok(PaymentOutcome::Ignored);
        }

        self.confirm_payment(order_id, PaymentSignal::from(details)).await
    }

    /// Back-office status write. Writing the current status is a no-op.
    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: OrderId, target: &str, actor: UserId) -> Result<Order> {
        let to = OrderStatus::parse(target)?;

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let mut order = self.get(order_id).await?;
            let transition = match order.plan(to, TransitionOrigin::Administrator) {
                Ok(t) => t,
                Err(OrderError::Unchanged(_)) => return Ok(order),
                Err(e) => return Err(e.into()),
            };

            let commit = self.plan_commit(&order, &transition, actor).await?;
            let Some(applied) = self.orders.commit_transition(&commit).await? else {
                continue;
            };

            self.report_stock(&commit, &applied).await;
            order.apply(&transition);
            info!(from = %transition.from, to = %transition.to, "Order status changed");
            self.publish(&mut order).await;
            self.notifications.status_changed(&order).await;
            return Ok(order);
        }

        Err(RepositoryError::Conflict(format!("order {order_id} kept changing during status update")).into())
    }

    /// The swap plus the stock changes its [`StockEffect`] calls for.
    async fn plan_commit(&self, order: &Order, transition: &Transition, actor: UserId) -> Result<TransitionCommit> {
        let mut commit = TransitionCommit::new(order.id(), transition.from, transition.to);
        commit.stock = match transition.stock {
            StockEffect::None => Vec::new(),
            StockEffect::Deduct => order
                .items()
                .iter()
                .map(|item| StockChange {
                    product_id: item.product_id,
                    delta: item.quantity.as_depletion(),
                    reason: StockReason::Sale,
                    actor: Some(actor),
                    order_id: Some(order.id()),
                })
                .collect(),
            StockEffect::Restore => {
                // Replays the effective sale deltas so sale and cancellation cancel out.
                self.products
                    .entries_for_order(order.id())
                    .await?
                    .into_iter()
                    .filter(|e| e.reason == StockReason::Sale && e.delta != 0)
                    .map(|entry| StockChange {
                        product_id: entry.product_id,
                        delta: -entry.delta,
                        reason: StockReason::Cancellation,
                        actor: Some(actor),
                        order_id: Some(order.id()),
                    })
                    .collect()
            }
        };
        Ok(commit)
    }

    async fn report_stock(&self, commit: &TransitionCommit, applied: &[StockApplication]) {
        for (change, applied) in commit.stock.iter().zip(applied) {
            self.ledger.report(change, applied).await;
        }
    }

    async fn publish(&self, order: &mut Order) { self.events.publish_all(order.take_events()).await; }
}
