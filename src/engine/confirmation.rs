//! Delivery confirmation: a six-digit code generated when cooking starts,
//! shown to the customer and required verbatim from the courier at drop-off.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{DeliveryChecker, Order};
use crate::state::AppState;
use crate::store::{Store, Transaction};

pub const CODE_MIN: u32 = 100_000;
pub const CODE_MAX: u32 = 999_999;

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryCode {
    pub order_id: Uuid,
    pub code: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Accepted,
    Rejected { attempts_left: u32 },
    Locked,
}

pub fn generate_code() -> u32 {
    rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX)
}

pub fn new_checker(order_id: Uuid, now: DateTime<Utc>) -> DeliveryChecker {
    DeliveryChecker {
        order_id,
        code: generate_code(),
        failed_attempts: 0,
        created_at: now,
    }
}

pub fn parse_code(raw: &str) -> Result<u32, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Validation("delivery code is required".to_string()));
    }
    raw.parse::<u32>()
        .map_err(|_| AppError::Validation("delivery code must be numeric".to_string()))
}

/// Compares `supplied` against the checker. A wrong code counts against
/// `max_attempts`; once exhausted the checker stays locked until rotated.
pub fn verify(checker: &mut DeliveryChecker, supplied: u32, max_attempts: u32) -> CodeCheck {
    if checker.failed_attempts >= max_attempts {
        return CodeCheck::Locked;
    }
    if checker.code == supplied {
        return CodeCheck::Accepted;
    }

    checker.failed_attempts += 1;
    CodeCheck::Rejected {
        attempts_left: max_attempts.saturating_sub(checker.failed_attempts),
    }
}

async fn owned_live_order<T: Transaction>(
    tx: &mut T,
    customer_id: Uuid,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let order = tx
        .lock_order(order_id)
        .await?
        .filter(|order| order.customer_id == customer_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if !order.status.holds_checker() {
        return Err(AppError::Conflict(format!(
            "order {order_id} has no active delivery code in status {:?}",
            order.status
        )));
    }
    Ok(order)
}

pub async fn show_code<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
    order_id: Uuid,
) -> Result<DeliveryCode, AppError> {
    let mut tx = state.store.begin().await?;
    owned_live_order(&mut tx, customer_id, order_id).await?;

    let checker = tx
        .checker(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no delivery code for order {order_id}")))?;

    Ok(DeliveryCode {
        order_id,
        code: checker.code,
    })
}

/// Replaces the code of a live order and resets its attempt counter.
pub async fn rotate_code<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
    order_id: Uuid,
) -> Result<DeliveryCode, AppError> {
    let mut tx = state.store.begin().await?;
    owned_live_order(&mut tx, customer_id, order_id).await?;

    let checker = new_checker(order_id, Utc::now());
    let code = checker.code;
    tx.put_checker(checker).await?;
    tx.commit().await?;

    info!(order_id = %order_id, "delivery code rotated");
    Ok(DeliveryCode { order_id, code })
}
