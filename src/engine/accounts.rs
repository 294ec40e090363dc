//! User accounts: registration, listing, logout and removal.
//!
//! Credentials are issued and checked by the authentication collaborator;
//! this module only stores the opaque password hash it hands over.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::CourierStatus;
use crate::models::user::{RevokedToken, User};
use crate::state::AppState;
use crate::store::{Store, Transaction};

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
}

/// Creates a Customer. Name, email and phone are unique; a clash with an
/// existing account surfaces as Conflict when the store commits.
pub async fn register<S: Store>(
    state: &AppState<S>,
    registration: Registration,
) -> Result<User, AppError> {
    let Registration {
        name,
        email,
        phone,
        password_hash,
    } = registration;

    let missing: Vec<&str> = [
        ("name", &name),
        ("email", &email),
        ("phone", &phone),
        ("password_hash", &password_hash),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
    .collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }

    let mut user = User::new(name.trim(), email.trim(), phone.trim());
    user.password_hash = password_hash;

    let mut tx = state.store.begin().await?;
    tx.put_user(user.clone()).await?;
    tx.commit().await?;

    info!(user_id = %user.id, name = %user.name, "user registered");
    Ok(user)
}

pub async fn list_users<S: Store>(state: &AppState<S>) -> Result<Vec<User>, AppError> {
    let mut tx = state.store.begin().await?;
    Ok(tx.users().await?)
}

pub async fn logout<S: Store>(state: &AppState<S>, token: &str) -> Result<(), AppError> {
    if token.trim().is_empty() {
        return Err(AppError::Validation("token is required".to_string()));
    }

    let mut tx = state.store.begin().await?;
    tx.revoke_token(RevokedToken {
        token: token.to_string(),
        created_at: Utc::now(),
    })
    .await?;
    tx.commit().await?;

    info!("token revoked");
    Ok(())
}

pub async fn is_token_revoked<S: Store>(state: &AppState<S>, token: &str) -> Result<bool, AppError> {
    let mut tx = state.store.begin().await?;
    Ok(tx.is_revoked(token).await?)
}

/// Soft-deletes the account. A courier's row goes with it, unless the courier
/// is out on a delivery.
pub async fn remove_account<S: Store>(state: &AppState<S>, user_id: Uuid) -> Result<(), AppError> {
    let mut tx = state.store.begin().await?;
    let mut user = tx
        .lock_user(user_id)
        .await?
        .filter(|user| user.is_active())
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;

    if let Some(existing) = tx.courier_by_user(user_id).await? {
        let courier = tx
            .lock_courier(existing.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("courier {} not found", existing.id)))?;
        if courier.status == CourierStatus::Active {
            warn!(user_id = %user_id, courier_id = %courier.id, "removal of a delivering courier");
            return Err(AppError::Conflict(
                "courier is delivering an order".to_string(),
            ));
        }
        tx.delete_courier(courier.id).await?;
    }

    let now = Utc::now();
    user.deleted_at = Some(now);
    user.updated_at = now;
    tx.put_user(user).await?;
    tx.commit().await?;

    info!(user_id = %user_id, "account removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::roles::set_role;
    use crate::store::memory::MemoryStore;

    fn registration(name: &str) -> Registration {
        Registration {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            phone: format!("+{name}"),
            password_hash: "opaque".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_conflict() {
        let state = AppState::new(MemoryStore::default(), Config::default());
        register(&state, registration("nina")).await.unwrap();

        let mut clash = registration("nina");
        clash.phone = "+other".to_string();
        let err = register(&state, clash).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));

        let mut blank = registration("oleg");
        blank.email = " ".to_string();
        assert!(matches!(
            register(&state, blank).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let state = AppState::new(MemoryStore::default(), Config::default());
        assert!(!is_token_revoked(&state, "abc").await.unwrap());

        logout(&state, "abc").await.unwrap();
        assert!(is_token_revoked(&state, "abc").await.unwrap());
        assert!(!is_token_revoked(&state, "abd").await.unwrap());
    }

    #[tokio::test]
    async fn removed_courier_loses_courier_row() {
        let state = AppState::new(MemoryStore::default(), Config::default());
        let user = register(&state, registration("pavel")).await.unwrap();
        set_role(&state, Uuid::new_v4(), "pavel", "Courier").await.unwrap();

        remove_account(&state, user.id).await.unwrap();

        let mut tx = state.store.begin().await.unwrap();
        assert!(tx.courier_by_user(user.id).await.unwrap().is_none());
        let stored = tx.user(user.id).await.unwrap().unwrap();
        assert!(stored.deleted_at.is_some());
        drop(tx);

        assert!(list_users(&state).await.unwrap().is_empty());
        let again = remove_account(&state, user.id).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }
}
