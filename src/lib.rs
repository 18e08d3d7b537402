//! Storefront checkout service
//!
//! Turns a shopping cart into a gateway-hosted payment, reconciles the
//! gateway's payment signals with the order, and keeps product stock and its
//! ledger in step.
//!
//! ## Features
//! - Payment preference creation from the caller's cart
//! - Redirect and webhook payment confirmation, idempotent per order
//! - Order status state machine with administrative transitions
//! - Append-only stock ledger with clamping at zero
//! - Best-effort order emails and domain events

use thiserror::Error;

pub mod config;
pub mod domain;
pub mod gateway;
pub mod http;
pub mod notify;
pub mod services;
pub mod store;

use domain::aggregates::OrderError;
use domain::value_objects::ProductId;
use gateway::GatewayError;
use store::RepositoryError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Product {0} is no longer available")]
    ProductUnavailable(ProductId),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Admin role required")]
    Forbidden,

    #[error("Could not create payment preference")]
    PreferenceCreation(#[source] GatewayError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
