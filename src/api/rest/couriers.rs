use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::Caller;
use crate::engine::matching::{self, CourierProfile};
use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::order::{Order, OrderDetails};
use crate::models::user::Role;
use crate::state::AppState;
use crate::store::Store;

pub fn router<S: Store>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/courier/me", get(profile::<S>))
        .route("/courier/status", patch(update_status::<S>))
        .route("/courier/orders", get(list_assignable::<S>))
        .route("/courier/orders/:id/claim", post(claim::<S>))
        .route("/courier/orders/:id/release", post(release::<S>))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    pub code: String,
}

async fn profile<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<CourierProfile>, AppError> {
    caller.require(Role::Courier)?;
    Ok(Json(matching::courier_profile(&state, caller.id()).await?))
}

async fn update_status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    caller.require(Role::Courier)?;
    let courier = matching::set_courier_status(&state, caller.id(), payload.status).await?;
    Ok(Json(courier))
}

async fn list_assignable<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<Vec<OrderDetails>>, AppError> {
    caller.require(Role::Courier)?;
    Ok(Json(matching::list_assignable_orders(&state).await?))
}

async fn claim<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    caller.require(Role::Courier)?;
    Ok(Json(matching::claim_order(&state, caller.id(), id).await?))
}

async fn release<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReleaseRequest>,
) -> Result<Json<Order>, AppError> {
    caller.require(Role::Courier)?;
    let order = matching::release_courier(&state, caller.id(), id, &payload.code).await?;
    Ok(Json(order))
}
