//! Stock ledger application.
//!
//! Every stock change clamps at zero, writes the new stock and appends one
//! ledger entry carrying the effective delta, in a single store operation.
//! Manual changes go through [`StockLedger::apply`]; order transitions write
//! theirs inside [`OrderStore::commit_transition`](crate::store::OrderStore::commit_transition)
//! and hand the results to [`StockLedger::report`].

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::aggregates::{Product, StockChange, StockLedgerEntry};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::value_objects::ProductId;
use crate::services::events::EventPublisher;
use crate::store::{ProductStore, StockApplication};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct StockLedger {
    products: Arc<dyn ProductStore>,
    events: EventPublisher,
}

impl StockLedger {
    pub fn new(products: Arc<dyn ProductStore>, events: EventPublisher) -> Self { Self { products, events } }

    /// Applies one change. `Ok(None)` means the product no longer exists.
    #[instrument(skip(self), fields(product_id = %change.product_id, delta = change.delta, reason = %change.reason))]
    pub async fn apply(&self, change: &StockChange) -> Result<StockApplication> {
        let applied = self.products.apply_stock_change(change).await?;
        self.report(change, &applied).await;
        Ok(applied)
    }

    /// Logs and publishes a change already written by the store, either here
    /// or together with an order transition.
    pub async fn report(&self, change: &StockChange, applied: &StockApplication) {
        let Some((product, entry)) = applied else {
            warn!(product_id = %change.product_id, reason = %change.reason, "Stock change skipped, product not found");
            return;
        };
        if entry.delta != change.delta {
            info!(
                product_id = %product.id,
                requested = change.delta,
                applied = entry.delta,
                stock = product.stock,
                "Stock change clamped at zero"
            );
        } else {
            info!(product_id = %product.id, delta = entry.delta, stock = product.stock, "Stock changed");
        }
        self.events
            .publish(&DomainEvent::Stock(StockEvent::Adjusted {
                product_id: product.id,
                delta: entry.delta,
                stock: product.stock,
                reason: entry.reason,
            }))
            .await;
    }

    /// Back-office correction. Only `adjustment` and `inbound` are accepted.
    pub async fn adjust(&self, change: &StockChange) -> Result<(Product, StockLedgerEntry)> {
        if !change.reason.is_manual() {
            return Err(EcommerceError::Validation(format!("reason '{}' is reserved for orders", change.reason)));
        }
        if change.delta == 0 {
            return Err(EcommerceError::Validation("delta must not be zero".to_string()));
        }
        self.apply(change).await?.ok_or(EcommerceError::ProductNotFound(change.product_id))
    }

    pub async fn history(&self, product_id: ProductId) -> Result<Vec<StockLedgerEntry>> {
        if self.products.get(product_id).await?.is_none() {
            return Err(EcommerceError::ProductNotFound(product_id));
        }
        Ok(self.products.history(product_id).await?)
    }
}
