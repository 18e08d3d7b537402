//! Mercado Pago REST client (Checkout Pro preferences + payments API).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{
    is_payment_id, BackUrls, GatewayError, GatewayPaymentStatus, PaymentDetails, PaymentGateway, PaymentMetadata, Preference,
    PreferenceItem, PreferenceRequest,
};
use crate::config::GatewayConfig;

#[derive(Clone)]
pub struct MercadoPagoClient {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Serialize)]
struct PreferenceBody<'a> {
    items: &'a [PreferenceItem],
    back_urls: &'a BackUrls,
    auto_return: &'static str,
    external_reference: &'a str,
    metadata: &'a PaymentMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
    #[serde(default)]
    sandbox_init_point: Option<String>,
}

impl MercadoPagoClient {
    /// Every request carries the access token and is bounded by the configured timeout.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.access_token.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| GatewayError::Parse(format!("invalid access token: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, api_base: config.api_base.trim_end_matches('/').to_string() })
    }

    async fn error_from(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        GatewayError::Api { status, message }
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() { GatewayError::Timeout } else { GatewayError::Http(err) }
}

/// Maps a `/v1/payments/{id}` response body.
pub(crate) fn parse_payment(raw: serde_json::Value) -> Result<PaymentDetails, GatewayError> {
    let id = match raw.get("id") {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        _ => return Err(GatewayError::Parse("payment without id".to_string())),
    };
    let status = raw
        .get("status")
        .and_then(|s| s.as_str())
        .map(GatewayPaymentStatus::parse)
        .ok_or_else(|| GatewayError::Parse(format!("payment {id} without status")))?;
    let metadata = raw
        .get("metadata")
        .filter(|m| m.is_object())
        .map(|m| serde_json::from_value::<PaymentMetadata>(m.clone()))
        .transpose()
        .map_err(|e| GatewayError::Parse(format!("payment {id} metadata: {e}")))?
        .unwrap_or_default();
    let external_reference = raw.get("external_reference").and_then(|r| r.as_str()).map(String::from);

    Ok(PaymentDetails { id, status, metadata, external_reference, raw })
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    #[instrument(skip(self, request), fields(external_reference = %request.external_reference, items = request.items.len()))]
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Preference, GatewayError> {
        let body = PreferenceBody {
            items: &request.items,
            back_urls: &request.back_urls,
            auto_return: "approved",
            external_reference: &request.external_reference,
            metadata: &request.metadata,
            notification_url: request.notification_url.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let pref: PreferenceResponse = response.json().await.map_err(|e| GatewayError::Parse(e.to_string()))?;
        tracing::info!(preference_id = %pref.id, "Payment preference created");
        Ok(Preference { id: pref.id, init_point: pref.init_point, sandbox_init_point: pref.sandbox_init_point })
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, GatewayError> {
        if !is_payment_id(payment_id) {
            return Err(GatewayError::PaymentNotFound(payment_id.to_string()));
        }
        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.api_base, payment_id))
            .send()
            .await
            .map_err(classify)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::PaymentNotFound(payment_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let raw: serde_json::Value = response.json().await.map_err(|e| GatewayError::Parse(e.to_string()))?;
        parse_payment(raw)
    }
}
