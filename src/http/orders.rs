use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use super::{AdminUser, AppState, CurrentUser};
use crate::domain::aggregates::Order;
use crate::domain::value_objects::OrderId;
use crate::services::checkout::GATEWAY_PAYMENT_METHOD;
use crate::services::CheckoutSession;
use crate::{EcommerceError, Result};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 64))]
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    #[validate(length(min = 1, max = 32))]
    pub status: String,
}

fn validate(request: &impl Validate) -> Result<()> {
    request.validate().map_err(|e| EcommerceError::Validation(e.to_string()))
}

pub(super) fn parse_order_id(raw: &str) -> Result<OrderId> {
    OrderId::parse(raw).ok_or_else(|| EcommerceError::Validation(format!("invalid order id '{raw}'")))
}

pub async fn create_preference(State(state): State<AppState>, user: CurrentUser) -> Result<Json<CheckoutSession>> {
    Ok(Json(state.services().checkout.create_preference(user.id).await?))
}

pub async fn create_order(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Option<Json<CreateOrderRequest>>,
) -> Result<(StatusCode, Json<Order>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    validate(&request)?;
    let method = request.payment_method.as_deref().unwrap_or(GATEWAY_PAYMENT_METHOD);
    let order = state.services().checkout.create_order(user.id, method).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_mine(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<Order>>> {
    Ok(Json(state.services().lifecycle.orders_for_user(user.id).await?))
}

pub async fn list_all(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<Vec<Order>>> {
    Ok(Json(state.services().lifecycle.all_orders().await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Order>> {
    validate(&request)?;
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.services().lifecycle.update_status(order_id, &request.status, admin.id).await?))
}
