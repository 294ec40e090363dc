use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::user::{Role, User};
use crate::state::AppState;
use crate::store::{Store, Transaction};

/// Admin role change. Leaving the courier role removes the courier row and
/// entering it creates a fresh Unactive one, in the same transaction as the
/// role update.
pub async fn set_role<S: Store>(
    state: &AppState<S>,
    admin_id: Uuid,
    username: &str,
    role: &str,
) -> Result<User, AppError> {
    let role: Role = role.parse().map_err(AppError::Validation)?;

    let mut tx = state.store.begin().await?;
    let target = tx
        .user_by_name(username)
        .await?
        .filter(|user| user.is_active())
        .ok_or_else(|| AppError::NotFound(format!("user {username} not found")))?;
    let mut user = tx
        .lock_user(target.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {username} not found")))?;

    if user.role == role {
        return Err(AppError::Conflict(format!("user {username} is already {role}")));
    }

    if user.role == Role::Courier {
        if let Some(existing) = tx.courier_by_user(user.id).await? {
            let courier = tx
                .lock_courier(existing.id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("courier {} not found", existing.id)))?;
            if courier.status == CourierStatus::Active {
                warn!(user_id = %user.id, courier_id = %courier.id, "demotion of a delivering courier");
                return Err(AppError::Conflict(format!(
                    "courier {username} is delivering an order"
                )));
            }
            tx.delete_courier(courier.id).await?;
        }
    }
    if role == Role::Courier {
        tx.put_courier(Courier::for_user(user.id)).await?;
    }

    let previous = user.role;
    user.role = role;
    user.updated_at = Utc::now();
    tx.put_user(user.clone()).await?;
    tx.commit().await?;

    info!(user_id = %user.id, admin_id = %admin_id, from = %previous, to = %role, "role changed");
    Ok(user)
}
