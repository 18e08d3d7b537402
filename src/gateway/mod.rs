//! Payment gateway seam.
//!
//! The gateway hosts the checkout page. We hand it a priced item list and get
//! back a preference id plus redirect URLs; later it reports payments either
//! through the browser redirect or through a webhook.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mercadopago;
pub mod mock;

pub use mercadopago::MercadoPagoClient;
pub use mock::MockGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("payment {0} not found")]
    PaymentNotFound(String),

    #[error("gateway call timed out")]
    Timeout,

    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreferenceItem {
    pub title: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    pub currency_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

/// Correlation data echoed back on every payment made against a preference.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default, alias = "orderId", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub back_urls: BackUrls,
    pub external_reference: String,
    pub metadata: PaymentMetadata,
    pub notification_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub id: String,
    /// Production checkout URL.
    pub init_point: String,
    /// Test-mode checkout URL, when the gateway returns one.
    pub sandbox_init_point: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaymentDetails {
    pub id: String,
    pub status: GatewayPaymentStatus,
    pub metadata: PaymentMetadata,
    pub external_reference: Option<String>,
    /// Full gateway response, stored on the order for audit.
    pub raw: serde_json::Value,
}

impl PaymentDetails {
    /// Order id from metadata, falling back to the external reference.
    pub fn order_reference(&self) -> Option<&str> {
        self.metadata
            .order_id
            .as_deref()
            .or(self.external_reference.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Payment status as the gateway reports it. Only `Approved` moves an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    Approved,
    Pending,
    InProcess,
    Rejected,
    Cancelled,
    Other(String),
}

impl GatewayPaymentStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "approved" => Self::Approved,
            "pending" => Self::Pending,
            "in_process" => Self::InProcess,
            "rejected" => Self::Rejected,
            "cancelled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Approved => "approved",
            Self::Pending => "pending",
            Self::InProcess => "in_process",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Other(s) => s,
        }
    }

    pub fn is_approved(&self) -> bool { matches!(self, Self::Approved) }
}

/// Gateway payment ids are decimal numbers. Anything else is refused before
/// it reaches a request path.
pub fn is_payment_id(id: &str) -> bool { !id.is_empty() && id.len() <= 32 && id.bytes().all(|b| b.is_ascii_digit()) }

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Preference, GatewayError>;

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError>;
}
