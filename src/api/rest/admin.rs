use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch};
use axum::Json;
use axum::Router;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::Caller;
use crate::engine::{accounts, catalog, matching, reviews, roles};
use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::dish::Dish;
use crate::models::review::{Review, ReviewStatus};
use crate::models::user::{Role, User};
use crate::state::AppState;
use crate::store::Store;

pub fn router<S: Store>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/admin/users", get(list_users::<S>))
        .route("/admin/users/:username/role", patch(set_role::<S>))
        .route("/admin/couriers", get(list_couriers::<S>))
        .route("/admin/couriers/:id", get(get_courier::<S>))
        .route("/admin/reviews", get(list_reviews::<S>))
        .route("/admin/reviews/:id", patch(moderate_review::<S>))
        .route("/admin/dishes/:id", delete(delete_dish::<S>))
        .route("/admin/dishes/:id/price", patch(change_price::<S>))
}

#[derive(Deserialize)]
pub struct SetRoleRequest {
    pub role: String,
}

#[derive(Deserialize)]
pub struct CourierQuery {
    pub status: Option<CourierStatus>,
}

#[derive(Deserialize)]
pub struct ReviewQuery {
    pub status: Option<ReviewStatus>,
}

#[derive(Deserialize)]
pub struct ModerateRequest {
    pub status: ReviewStatus,
}

#[derive(Deserialize)]
pub struct PriceRequest {
    pub price: Decimal,
}

async fn list_users<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<Vec<User>>, AppError> {
    caller.require(Role::Admin)?;
    Ok(Json(accounts::list_users(&state).await?))
}

async fn set_role<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(username): Path<String>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<User>, AppError> {
    caller.require(Role::Admin)?;
    let user = roles::set_role(&state, caller.id(), &username, &payload.role).await?;
    Ok(Json(user))
}

async fn list_couriers<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Query(query): Query<CourierQuery>,
) -> Result<Json<Vec<Courier>>, AppError> {
    caller.require(Role::Admin)?;
    Ok(Json(matching::list_couriers(&state, query.status).await?))
}

async fn get_courier<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    caller.require(Role::Admin)?;
    Ok(Json(matching::get_courier(&state, id).await?))
}

async fn list_reviews<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Query(query): Query<ReviewQuery>,
) -> Result<Json<Vec<Review>>, AppError> {
    caller.require(Role::Admin)?;
    Ok(Json(reviews::list_reviews(&state, query.status).await?))
}

async fn moderate_review<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<ModerateRequest>,
) -> Result<Json<Review>, AppError> {
    caller.require(Role::Admin)?;
    let review = reviews::moderate_review(&state, caller.id(), id, payload.status).await?;
    Ok(Json(review))
}

async fn change_price<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<PriceRequest>,
) -> Result<Json<Dish>, AppError> {
    caller.require(Role::Admin)?;
    Ok(Json(catalog::change_dish_price(&state, id, payload.price).await?))
}

async fn delete_dish<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(Role::Admin)?;
    catalog::delete_dish(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
