//! Caller identity as handed over by the authentication collaborator.
//!
//! The collaborator verifies credentials upstream and forwards the user id in
//! `x-user-id`. A bearer token that was revoked by logout is refused even if
//! the id header is present.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::state::AppState;
use crate::store::{Store, Transaction};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
    pub token: Option<String>,
}

impl Caller {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn require(&self, role: Role) -> Result<(), AppError> {
        if self.user.role == role {
            return Ok(());
        }
        warn!(user_id = %self.user.id, role = %self.user.role, required = %role, "role mismatch");
        Err(AppError::Forbidden(format!("{role} role required")))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl<S: Store> FromRequestParts<Arc<AppState<S>>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| AppError::Unauthorized("missing or malformed caller id".to_string()))?;
        let token = bearer_token(parts);

        let mut tx = state.store.begin().await?;
        if let Some(token) = &token {
            if tx.is_revoked(token).await? {
                return Err(AppError::Unauthorized("token has been revoked".to_string()));
            }
        }

        let user = tx
            .user(user_id)
            .await?
            .filter(|user| user.is_active())
            .ok_or_else(|| AppError::Unauthorized("unknown caller".to_string()))?;

        Ok(Caller { user, token })
    }
}
