//! Dish reviews: proof-of-purchase gated submission and admin moderation.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::review::{Review, ReviewStatus};
use crate::state::AppState;
use crate::store::{ReviewFilter, Store, Transaction};

pub const MIN_MARK: u8 = 1;
pub const MAX_MARK: u8 = 5;

/// Records a Pending review. The purchase gate runs before the mark and
/// text are looked at, so a customer who never received the dish always
/// gets Forbidden.
pub async fn submit_review<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
    dish_id: Uuid,
    mark: u8,
    text: &str,
) -> Result<Review, AppError> {
    let mut tx = state.store.begin().await?;
    tx.lock_user(customer_id)
        .await?
        .filter(|user| user.is_active())
        .ok_or_else(|| AppError::NotFound(format!("user {customer_id} not found")))?;

    if !tx.has_purchased(customer_id, dish_id).await? {
        warn!(user_id = %customer_id, dish_id = %dish_id, "review without a delivered order");
        return Err(AppError::Forbidden(
            "dish must be part of a delivered order to be reviewed".to_string(),
        ));
    }

    let existing = ReviewFilter {
        user_id: Some(customer_id),
        dish_id: Some(dish_id),
        status: None,
    };
    if !tx.reviews(&existing).await?.is_empty() {
        return Err(AppError::Conflict(format!(
            "dish {dish_id} has already been reviewed"
        )));
    }

    if !(MIN_MARK..=MAX_MARK).contains(&mark) {
        return Err(AppError::Validation(format!(
            "mark must be between {MIN_MARK} and {MAX_MARK}"
        )));
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("review text is required".to_string()));
    }

    if tx.dish(dish_id).await?.is_none() {
        return Err(AppError::NotFound(format!("dish {dish_id} not found")));
    }

    let review = Review {
        id: Uuid::new_v4(),
        user_id: customer_id,
        dish_id,
        mark,
        text: text.to_string(),
        status: ReviewStatus::Pending,
        created_at: Utc::now(),
    };
    tx.put_review(review.clone()).await?;
    tx.commit().await?;

    info!(review_id = %review.id, dish_id = %dish_id, "review submitted");
    Ok(review)
}

pub async fn moderate_review<S: Store>(
    state: &AppState<S>,
    admin_id: Uuid,
    review_id: Uuid,
    status: ReviewStatus,
) -> Result<Review, AppError> {
    let mut tx = state.store.begin().await?;
    let mut review = tx
        .review(review_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("review {review_id} not found")))?;

    review.status = status;
    tx.put_review(review.clone()).await?;
    tx.commit().await?;

    info!(review_id = %review_id, admin_id = %admin_id, status = ?status, "review moderated");
    Ok(review)
}

pub async fn list_accepted_reviews_for_dish<S: Store>(
    state: &AppState<S>,
    dish_id: Uuid,
) -> Result<Vec<Review>, AppError> {
    let mut tx = state.store.begin().await?;
    let filter = ReviewFilter {
        dish_id: Some(dish_id),
        status: Some(ReviewStatus::Accepted),
        ..ReviewFilter::default()
    };
    Ok(tx.reviews(&filter).await?)
}

pub async fn list_reviews<S: Store>(
    state: &AppState<S>,
    status: Option<ReviewStatus>,
) -> Result<Vec<Review>, AppError> {
    let mut tx = state.store.begin().await?;
    let filter = ReviewFilter {
        status,
        ..ReviewFilter::default()
    };
    Ok(tx.reviews(&filter).await?)
}
