//! Error to response mapping. Internal causes are logged, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::aggregates::OrderError;
use crate::EcommerceError;

impl EcommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart | Self::Validation(_) | Self::ProductUnavailable(_) => StatusCode::BAD_REQUEST,
            Self::Order(OrderError::InvalidStatus(_) | OrderError::NoItems | OrderError::CurrencyMismatch) => StatusCode::BAD_REQUEST,
            Self::Order(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::OrderNotFound(_) | Self::ProductNotFound(_) => StatusCode::NOT_FOUND,
            Self::PreferenceCreation(_) | Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::PreferenceCreation(cause) => {
                tracing::error!(error = %cause, "Payment preference creation failed");
                self.to_string()
            }
            Self::Gateway(cause) => {
                tracing::error!(error = %cause, "Gateway request failed");
                "Payment gateway unavailable".to_string()
            }
            Self::Storage(cause) => {
                tracing::error!(error = %cause, "Request failed");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
