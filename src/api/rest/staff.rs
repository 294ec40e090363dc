use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::Caller;
use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::order::{Order, OrderDetails, OrderStatus};
use crate::models::user::Role;
use crate::state::AppState;
use crate::store::Store;

pub fn router<S: Store>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/staff/orders", get(list_cooking::<S>))
        .route("/staff/orders/:id", patch(advance::<S>))
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub status: OrderStatus,
}

async fn list_cooking<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<Vec<OrderDetails>>, AppError> {
    caller.require(Role::Staff)?;
    Ok(Json(lifecycle::list_cooking_orders(&state).await?))
}

async fn advance<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<Order>, AppError> {
    caller.require(Role::Staff)?;
    let order = lifecycle::staff_advance_order(&state, caller.id(), id, payload.status).await?;
    Ok(Json(order))
}
