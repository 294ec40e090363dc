pub mod account;
pub mod admin;
pub mod auth;
pub mod couriers;
pub mod dishes;
pub mod orders;
pub mod staff;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::error::AppError;
use crate::models::order::OrderStatus;
use crate::state::AppState;
use crate::store::{OrderFilter, Store, Transaction};

pub fn router<S: Store>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .merge(orders::router::<S>())
        .merge(staff::router::<S>())
        .merge(couriers::router::<S>())
        .merge(dishes::router::<S>())
        .merge(admin::router::<S>())
        .merge(account::router::<S>())
        .route("/health", get(health::<S>))
        .route("/metrics", get(metrics::<S>))
        .route("/ws", get(ws::ws_handler::<S>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    users: usize,
    couriers: usize,
    cooking: usize,
    waiting_for_courier: usize,
    out_for_delivery: usize,
    cached_dishes: usize,
}

async fn health<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<HealthResponse>, AppError> {
    let mut tx = state.store.begin().await?;
    let users = tx.users().await?.len();
    let couriers = tx.couriers(None).await?.len();
    let cooking = tx.orders(&OrderFilter::status(OrderStatus::Cooking)).await?.len();
    let waiting_for_courier = tx
        .orders(&OrderFilter::status(OrderStatus::WaitingForCourier))
        .await?
        .len();
    let out_for_delivery = tx
        .orders(&OrderFilter::status(OrderStatus::OutForDelivery))
        .await?
        .len();

    Ok(Json(HealthResponse {
        status: "ok",
        users,
        couriers,
        cooking,
        waiting_for_courier,
        out_for_delivery,
        cached_dishes: state.dish_cache.len(),
    }))
}

async fn metrics<S: Store>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
