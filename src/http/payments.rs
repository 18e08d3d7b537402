//! Gateway-facing endpoints: the browser redirect and the webhook.
//!
//! The webhook payload arrives in several shapes; [`WebhookNotice::from_request`]
//! reduces all of them to one payment id before anything else runs. Ids that
//! are not gateway payment ids are dropped here, on both endpoints.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::Value;
use tracing::{error, info, warn};

use super::AppState;
use crate::gateway::is_payment_id;
use crate::services::{RedirectParams, ResultPage};

pub async fn payment_result(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Redirect {
    let pick = |keys: &[&str]| keys.iter().find_map(|k| query.get(*k)).filter(|v| !v.trim().is_empty()).cloned();
    let params = RedirectParams {
        payment_id: pick(&["payment_id", "collection_id"]).filter(|id| is_payment_id(id.trim())),
        status: pick(&["status", "collection_status"]),
        preference_id: pick(&["preference_id"]),
    };

    let page = state.services().lifecycle.handle_redirect(&params).await;
    Redirect::to(&result_url(state.client_url(), page, params.payment_id.as_deref()))
}

pub(crate) fn result_url(client_url: &str, page: ResultPage, payment_id: Option<&str>) -> String {
    let base = format!("{client_url}/{}", page.path());
    let payment_id = payment_id.unwrap_or("null");
    match reqwest::Url::parse_with_params(&base, &[("payment_id", payment_id)]) {
        Ok(url) => url.to_string(),
        Err(_) => base,
    }
}

/// What a webhook delivery is about.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookNotice {
    Payment(String),
    /// A topic other than `payment`, e.g. `merchant_order`.
    OtherTopic(String),
    /// No payment id anywhere in the request.
    Empty,
    /// Something in the id position that is not a payment id.
    Malformed(String),
}

impl WebhookNotice {
    /// Looks in query `data.id` and `id`, then body `data.id`,
    /// `data.payment.id` and `id`. Ids may be strings or numbers.
    pub fn from_request(query: &HashMap<String, String>, body: &Value) -> Self {
        let topic = query
            .get("type")
            .or_else(|| query.get("topic"))
            .cloned()
            .or_else(|| body.get("type").or_else(|| body.get("topic")).and_then(Value::as_str).map(String::from));
        if let Some(topic) = topic.filter(|t| !t.trim().is_empty() && t.trim() != "payment") {
            return Self::OtherTopic(topic);
        }

        let from_query = query.get("data.id").or_else(|| query.get("id")).cloned();
        let from_body = || {
            [body.pointer("/data/id"), body.pointer("/data/payment/id"), body.get("id")]
                .into_iter()
                .flatten()
                .find_map(id_string)
        };
        match from_query.filter(|id| !id.trim().is_empty()).or_else(from_body) {
            Some(id) if is_payment_id(id.trim()) => Self::Payment(id.trim().to_string()),
            Some(id) => Self::Malformed(id),
            None => Self::Empty,
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Always 200 unless something on our side failed, in which case 500 so the
/// gateway delivers again.
pub async fn webhook(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, body: Bytes) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let payment_id = match WebhookNotice::from_request(&query, &body) {
        WebhookNotice::Payment(id) => id,
        WebhookNotice::OtherTopic(topic) => {
            info!(%topic, "Webhook topic ignored");
            return StatusCode::OK.into_response();
        }
        WebhookNotice::Empty => {
            info!("Webhook without payment id ignored");
            return StatusCode::OK.into_response();
        }
        WebhookNotice::Malformed(id) => {
            warn!(payment_id = %id, "Webhook with malformed payment id ignored");
            return StatusCode::OK.into_response();
        }
    };

    match state.services().lifecycle.handle_webhook(&payment_id).await {
        Ok(outcome) => {
            info!(%payment_id, ?outcome, "Webhook processed");
            StatusCode::OK.into_response()
        }
        Err(e) => {
            error!(%payment_id, error = %e, "Webhook processing failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
