//! In-process gateway used when no access token is configured, and by tests.
//!
//! Preferences are accepted and remembered; payments exist only once they
//! are registered through [`MockGateway::register_payment`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{GatewayError, GatewayPaymentStatus, PaymentDetails, PaymentGateway, PaymentMetadata, Preference, PreferenceRequest};

#[derive(Default)]
struct Inner {
    preferences: Vec<PreferenceRequest>,
    payments: HashMap<String, PaymentDetails>,
    fail_preferences: bool,
    fail_payment_lookups: bool,
}

#[derive(Default)]
pub struct MockGateway {
    inner: Mutex<Inner>,
}

impl MockGateway {
    pub fn new() -> Self { Self::default() }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every following preference request fail with an API error.
    pub fn fail_preferences(&self, fail: bool) { self.inner().fail_preferences = fail; }

    /// Makes every following payment lookup fail with a timeout.
    pub fn fail_payment_lookups(&self, fail: bool) { self.inner().fail_payment_lookups = fail; }

    /// Preference requests received so far, oldest first.
    pub fn preferences(&self) -> Vec<PreferenceRequest> { self.inner().preferences.clone() }

    pub fn register_payment(&self, details: PaymentDetails) {
        self.inner().payments.insert(details.id.clone(), details);
    }

    /// Registers a payment for `order_id` with the given gateway status.
    pub fn settle(&self, payment_id: &str, order_id: Option<&str>, status: &str) -> PaymentDetails {
        let raw = serde_json::json!({
            "id": payment_id,
            "status": status,
            "external_reference": order_id,
            "metadata": { "order_id": order_id },
        });
        let details = PaymentDetails {
            id: payment_id.to_string(),
            status: GatewayPaymentStatus::parse(status),
            metadata: PaymentMetadata { order_id: order_id.map(String::from), user_id: None },
            external_reference: order_id.map(String::from),
            raw,
        };
        self.register_payment(details.clone());
        details
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Preference, GatewayError> {
        let mut inner = self.inner();
        if inner.fail_preferences {
            return Err(GatewayError::Api { status: 503, message: "mock gateway unavailable".to_string() });
        }
        inner.preferences.push(request.clone());
        let id = format!("mock_pref_{}", Uuid::new_v4());
        info!(preference_id = %id, items = request.items.len(), "Mock preference created");
        Ok(Preference {
            init_point: format!("https://mock-gateway.local/checkout?pref_id={id}"),
            sandbox_init_point: Some(format!("https://sandbox.mock-gateway.local/checkout?pref_id={id}")),
            id,
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError> {
        let inner = self.inner();
        if inner.fail_payment_lookups {
            return Err(GatewayError::Timeout);
        }
        inner
            .payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::PaymentNotFound(payment_id.to_string()))
    }
}
