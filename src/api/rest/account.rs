use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::Router;

use crate::api::rest::auth::Caller;
use crate::engine::accounts;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::Store;

pub fn router<S: Store>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route("/logout", post(logout::<S>))
        .route("/users/me", delete(remove_account::<S>))
}

async fn logout<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<StatusCode, AppError> {
    let token = caller
        .token
        .as_deref()
        .ok_or_else(|| AppError::Validation("bearer token is required".to_string()))?;
    accounts::logout(&state, token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_account<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<StatusCode, AppError> {
    accounts::remove_account(&state, caller.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
