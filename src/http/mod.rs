//! HTTP surface: router, shared state and request handlers.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use secrecy::SecretString;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::Services;

pub mod auth;
pub mod error;
pub mod orders;
pub mod payments;
pub mod stock;

pub use auth::{AdminUser, CurrentUser, JwtVerifier};

pub const SERVICE_NAME: &str = "ecommerce-checkout";

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    services: Services,
    verifier: JwtVerifier,
    /// Storefront base URL the payment redirect sends buyers back to.
    client_url: String,
}

impl AppState {
    pub fn new(services: Services, jwt_secret: &SecretString, client_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { services, verifier: JwtVerifier::new(jwt_secret), client_url: client_url.into() }),
        }
    }

    pub fn services(&self) -> &Services { &self.inner.services }
    pub fn verifier(&self) -> &JwtVerifier { &self.inner.verifier }
    pub fn client_url(&self) -> &str { &self.inner.client_url }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/orders", get(orders::list_all).post(orders::create_order))
        .route("/api/orders/my", get(orders::list_mine))
        .route("/api/orders/create-preference", post(orders::create_preference))
        .route("/api/orders/payment-result", get(payments::payment_result))
        .route("/api/orders/:id/status", put(orders::update_status))
        .route("/api/payments/webhook", post(payments::webhook))
        .route("/api/products/:id/stock", post(stock::adjust))
        .route("/api/products/:id/stock-history", get(stock::history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": SERVICE_NAME }))
}
