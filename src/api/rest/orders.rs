use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::Caller;
use crate::engine::confirmation::{self, DeliveryCode};
use crate::engine::lifecycle::{self, SubmittedOrder};
use crate::error::AppError;
use crate::models::order::{Address, Order, OrderDetails};
use crate::models::user::Role;
use crate::state::AppState;
use crate::store::Store;

pub fn router<S: Store>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/cart", delete(delete_cart::<S>))
        .route("/cart/items", post(add_item::<S>))
        .route("/cart/submit", post(submit::<S>))
        .route("/orders", get(list_orders::<S>))
        .route("/orders/:id", get(get_order::<S>))
        .route("/orders/:id/code", get(show_code::<S>))
        .route("/orders/:id/code/rotate", post(rotate_code::<S>))
}

fn default_quantity() -> u32 {
    1
}

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub dish_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

async fn add_item<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(payload): Json<AddItemRequest>,
) -> Result<Json<Order>, AppError> {
    caller.require(Role::Customer)?;
    let order =
        lifecycle::add_line_item(&state, caller.id(), payload.dish_id, payload.quantity).await?;
    Ok(Json(order))
}

async fn submit<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(address): Json<Address>,
) -> Result<(StatusCode, Json<SubmittedOrder>), AppError> {
    caller.require(Role::Customer)?;
    let submitted = lifecycle::submit_order(&state, caller.id(), address).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

async fn delete_cart<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<StatusCode, AppError> {
    caller.require(Role::Customer)?;
    lifecycle::delete_cart_order(&state, caller.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_orders<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<Vec<Order>>, AppError> {
    caller.require(Role::Customer)?;
    Ok(Json(lifecycle::list_customer_orders(&state, caller.id()).await?))
}

async fn get_order<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetails>, AppError> {
    caller.require(Role::Customer)?;
    Ok(Json(
        lifecycle::customer_order_details(&state, caller.id(), id).await?,
    ))
}

async fn show_code<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryCode>, AppError> {
    caller.require(Role::Customer)?;
    Ok(Json(confirmation::show_code(&state, caller.id(), id).await?))
}

async fn rotate_code<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryCode>, AppError> {
    caller.require(Role::Customer)?;
    Ok(Json(confirmation::rotate_code(&state, caller.id(), id).await?))
}
