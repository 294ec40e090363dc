use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::auth::Caller;
use crate::engine::{catalog, reviews};
use crate::error::AppError;
use crate::models::dish::Dish;
use crate::models::review::Review;
use crate::models::user::Role;
use crate::state::AppState;
use crate::store::Store;

pub fn router<S: Store>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/dishes", get(list_dishes::<S>))
        .route("/dishes/:id", get(get_dish::<S>))
        .route(
            "/dishes/:id/reviews",
            get(list_reviews::<S>).post(submit_review::<S>),
        )
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub mark: u8,
    pub text: String,
}

async fn list_dishes<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Dish>>, AppError> {
    let dishes = catalog::list_dishes(&state).await?;
    Ok(Json(dishes.as_ref().clone()))
}

async fn get_dish<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Dish>, AppError> {
    Ok(Json(catalog::get_dish(&state, id).await?))
}

async fn list_reviews<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Review>>, AppError> {
    Ok(Json(reviews::list_accepted_reviews_for_dish(&state, id).await?))
}

async fn submit_review<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    caller.require(Role::Customer)?;
    let review = reviews::submit_review(&state, caller.id(), id, payload.mark, &payload.text).await?;
    Ok((StatusCode::CREATED, Json(review)))
}
