use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AdminUser, AppState};
use crate::domain::aggregates::{Product, StockChange, StockLedgerEntry, StockReason};
use crate::domain::value_objects::ProductId;
use crate::{EcommerceError, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustStockRequest {
    pub delta: i32,
    #[validate(length(min = 1, max = 32))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct AdjustStockResponse {
    pub product: Product,
    pub entry: StockLedgerEntry,
}

fn parse_product_id(raw: &str) -> Result<ProductId> {
    ProductId::parse(raw).ok_or_else(|| EcommerceError::Validation(format!("invalid product id '{raw}'")))
}

pub async fn adjust(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(request): Json<AdjustStockRequest>,
) -> Result<Json<AdjustStockResponse>> {
    request.validate().map_err(|e| EcommerceError::Validation(e.to_string()))?;
    let reason = StockReason::parse(&request.reason)
        .ok_or_else(|| EcommerceError::Validation(format!("unknown stock reason '{}'", request.reason)))?;
    let change = StockChange { product_id: parse_product_id(&id)?, delta: request.delta, reason, actor: Some(admin.id), order_id: None };

    let (product, entry) = state.services().ledger.adjust(&change).await?;
    Ok(Json(AdjustStockResponse { product, entry }))
}

pub async fn history(State(state): State<AppState>, _admin: AdminUser, Path(id): Path<String>) -> Result<Json<Vec<StockLedgerEntry>>> {
    Ok(Json(state.services().ledger.history(parse_product_id(&id)?).await?))
}
