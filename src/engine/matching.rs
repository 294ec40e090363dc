//! Courier matching: claiming a waiting order and releasing the courier once
//! the delivery code checks out.
//!
//! Claim and release lock the order row before the courier row. Two couriers
//! racing for the same order serialize on the order lock; the loser re-reads
//! an order that is no longer WaitingForCourier and fails with a conflict.

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::confirmation::{parse_code, verify, CodeCheck};
use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::order::{Order, OrderDetails, OrderEvent, OrderStatus};
use crate::models::user::Role;
use crate::state::AppState;
use crate::store::{OrderFilter, Store, Transaction};

#[derive(Debug, Clone, Serialize)]
pub struct CourierProfile {
    #[serde(flatten)]
    pub courier: Courier,
    pub name: String,
    pub email: String,
    pub phone: String,
}

async fn courier_of<T: Transaction>(tx: &mut T, user_id: Uuid) -> Result<Courier, AppError> {
    tx.courier_by_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no courier profile for user {user_id}")))
}

/// Orders waiting for a courier, with dishes and delivery address resolved.
pub async fn list_assignable_orders<S: Store>(
    state: &AppState<S>,
) -> Result<Vec<OrderDetails>, AppError> {
    let mut tx = state.store.begin().await?;
    Ok(tx
        .order_details(&OrderFilter::status(OrderStatus::WaitingForCourier))
        .await?)
}

pub async fn claim_order<S: Store>(
    state: &AppState<S>,
    courier_user_id: Uuid,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let start = Instant::now();
    let result = claim(state, courier_user_id, order_id).await;

    let outcome = match &result {
        Ok(_) => "claimed",
        Err(AppError::Conflict(_)) => "conflict",
        Err(_) => "error",
    };
    state
        .metrics
        .claim_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state.metrics.claims_total.with_label_values(&[outcome]).inc();

    result
}

async fn claim<S: Store>(
    state: &AppState<S>,
    courier_user_id: Uuid,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let mut tx = state.store.begin().await?;
    let courier_id = courier_of(&mut tx, courier_user_id).await?.id;

    let mut order = tx
        .lock_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    if order.status != OrderStatus::WaitingForCourier {
        warn!(order_id = %order_id, status = ?order.status, "claim on order that is not waiting");
        return Err(AppError::Conflict(format!("order {order_id} is already taken")));
    }

    let mut courier = tx
        .lock_courier(courier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
    if !courier.can_claim() {
        warn!(courier_id = %courier_id, status = ?courier.status, "claim by courier that is not waiting");
        return Err(AppError::Conflict(format!(
            "courier {courier_id} is not available, status must be Waiting"
        )));
    }

    let now = Utc::now();
    order.courier_id = Some(courier.id);
    order.advance(OrderStatus::OutForDelivery, Role::Courier, now)?;
    courier.status = CourierStatus::Active;
    courier.updated_at = now;

    tx.put_order(order.clone()).await?;
    tx.put_courier(courier).await?;
    tx.commit().await?;

    info!(order_id = %order_id, courier_id = %courier_id, "order claimed");
    state.publish(OrderEvent::from(&order));

    Ok(order)
}

/// Closes a delivered order once the courier supplies the matching code, and
/// returns the courier to the waiting pool.
pub async fn release_courier<S: Store>(
    state: &AppState<S>,
    courier_user_id: Uuid,
    order_id: Uuid,
    supplied_code: &str,
) -> Result<Order, AppError> {
    let supplied = parse_code(supplied_code)?;

    let mut tx = state.store.begin().await?;
    let courier_id = courier_of(&mut tx, courier_user_id).await?.id;

    let mut order = tx
        .lock_order(order_id)
        .await?
        .filter(|order| order.courier_id == Some(courier_id))
        .ok_or_else(|| {
            AppError::NotFound(format!("order {order_id} is not assigned to this courier"))
        })?;
    if order.status != OrderStatus::OutForDelivery {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {:?}, not OutForDelivery",
            order.status
        )));
    }

    let mut courier = tx
        .lock_courier(courier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
    let mut checker = tx
        .checker(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no delivery code for order {order_id}")))?;

    match verify(&mut checker, supplied, state.config.max_code_attempts) {
        CodeCheck::Accepted => {}
        CodeCheck::Rejected { attempts_left } => {
            tx.put_checker(checker).await?;
            tx.commit().await?;
            state.metrics.delivery_code_rejections_total.inc();
            warn!(order_id = %order_id, courier_id = %courier_id, attempts_left, "invalid delivery code");
            return Err(AppError::Validation("invalid code".to_string()));
        }
        CodeCheck::Locked => {
            state.metrics.delivery_code_rejections_total.inc();
            warn!(order_id = %order_id, courier_id = %courier_id, "delivery code locked");
            return Err(AppError::Conflict(
                "delivery code locked after too many invalid attempts".to_string(),
            ));
        }
    }

    let now = Utc::now();
    order.advance(OrderStatus::Closed, Role::Courier, now)?;
    courier.status = CourierStatus::Waiting;
    courier.completed_orders += 1;
    courier.updated_at = now;

    tx.put_order(order.clone()).await?;
    tx.put_courier(courier).await?;
    tx.delete_checker(order_id).await?;
    tx.commit().await?;

    info!(order_id = %order_id, courier_id = %courier_id, "order delivered and closed");
    state.publish(OrderEvent::from(&order));

    Ok(order)
}

/// A courier going on or off shift. `Active` is reserved for claims.
pub async fn set_courier_status<S: Store>(
    state: &AppState<S>,
    courier_user_id: Uuid,
    status: CourierStatus,
) -> Result<Courier, AppError> {
    if status == CourierStatus::Active {
        return Err(AppError::Validation(
            "couriers become Active only by claiming an order".to_string(),
        ));
    }

    let mut tx = state.store.begin().await?;
    let courier_id = courier_of(&mut tx, courier_user_id).await?.id;
    let mut courier = tx
        .lock_courier(courier_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

    if courier.status == CourierStatus::Active {
        return Err(AppError::Conflict(
            "courier is delivering an order".to_string(),
        ));
    }
    if courier.status == status {
        return Err(AppError::Conflict(format!("courier is already {status:?}")));
    }

    courier.status = status;
    courier.updated_at = Utc::now();
    tx.put_courier(courier.clone()).await?;
    tx.commit().await?;

    info!(courier_id = %courier.id, status = ?status, "courier status changed");
    Ok(courier)
}

pub async fn courier_profile<S: Store>(
    state: &AppState<S>,
    courier_user_id: Uuid,
) -> Result<CourierProfile, AppError> {
    let mut tx = state.store.begin().await?;
    let courier = courier_of(&mut tx, courier_user_id).await?;
    let user = tx
        .user(courier_user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {courier_user_id} not found")))?;

    Ok(CourierProfile {
        courier,
        name: user.name,
        email: user.email,
        phone: user.phone,
    })
}

pub async fn list_couriers<S: Store>(
    state: &AppState<S>,
    status: Option<CourierStatus>,
) -> Result<Vec<Courier>, AppError> {
    let mut tx = state.store.begin().await?;
    Ok(tx.couriers(status).await?)
}

pub async fn get_courier<S: Store>(state: &AppState<S>, id: Uuid) -> Result<Courier, AppError> {
    let mut tx = state.store.begin().await?;
    tx.courier(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;
    use crate::engine::confirmation::{rotate_code, show_code};
    use crate::engine::lifecycle::{add_line_item, staff_advance_order, submit_order};
    use crate::models::dish::Dish;
    use crate::models::order::Address;
    use crate::models::user::User;
    use crate::store::memory::MemoryStore;

    struct Fixture {
        state: Arc<AppState<MemoryStore>>,
        customer: Uuid,
        order_id: Uuid,
        code: u32,
    }

    async fn courier_user(state: &AppState<MemoryStore>, name: &str, status: CourierStatus) -> Uuid {
        let user = User::new(name, format!("{name}@example.com"), format!("+{name}"))
            .with_role(Role::Courier);
        let mut courier = Courier::for_user(user.id);
        courier.status = status;

        let mut tx = state.store.begin().await.unwrap();
        tx.put_user(user.clone()).await.unwrap();
        tx.put_courier(courier).await.unwrap();
        tx.commit().await.unwrap();
        user.id
    }

    async fn waiting_order() -> Fixture {
        let state = Arc::new(AppState::new(MemoryStore::default(), Config::default()));
        let customer = User::new("cust", "cust@example.com", "+1");
        let dish = Dish::new("noodles", Decimal::from(30), Uuid::new_v4());

        let mut tx = state.store.begin().await.unwrap();
        tx.put_user(customer.clone()).await.unwrap();
        tx.put_dish(dish.clone()).await.unwrap();
        tx.commit().await.unwrap();

        add_line_item(&state, customer.id, dish.id, 1).await.unwrap();
        let submitted = submit_order(
            &state,
            customer.id,
            Address {
                order_id: Uuid::nil(),
                phone: "+1".to_string(),
                street: "Elm".to_string(),
                house_number: "1".to_string(),
                apartment: "2".to_string(),
                entry_code: "3".to_string(),
            },
        )
        .await
        .unwrap();
        staff_advance_order(
            &state,
            Uuid::new_v4(),
            submitted.order.id,
            OrderStatus::WaitingForCourier,
        )
        .await
        .unwrap();

        Fixture {
            state,
            customer: customer.id,
            order_id: submitted.order.id,
            code: submitted.code,
        }
    }

    fn wrong(code: u32) -> String {
        if code == 999_999 {
            "100000".to_string()
        } else {
            (code + 1).to_string()
        }
    }

    #[tokio::test]
    async fn assignable_orders_are_resolved() {
        let fx = waiting_order().await;

        let orders = list_assignable_orders(&fx.state).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order.id, fx.order_id);
        assert_eq!(orders[0].items[0].dish.as_ref().unwrap().name, "noodles");
        assert_eq!(orders[0].address.as_ref().unwrap().street, "Elm");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_yield_exactly_one_winner() {
        let fx = waiting_order().await;
        let first = courier_user(&fx.state, "alice", CourierStatus::Waiting).await;
        let second = courier_user(&fx.state, "bob", CourierStatus::Waiting).await;
        let order_id = fx.order_id;

        let a = {
            let state = fx.state.clone();
            tokio::spawn(async move { claim_order(&state, first, order_id).await })
        };
        let b = {
            let state = fx.state.clone();
            tokio::spawn(async move { claim_order(&state, second, order_id).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let winners: Vec<&Order> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::Conflict(_)))));

        let mut tx = fx.state.store.begin().await.unwrap();
        let stored = tx.order(fx.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::OutForDelivery);
        assert_eq!(stored.courier_id, winners[0].courier_id);

        let active = tx.couriers(Some(CourierStatus::Active)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(Some(active[0].id), stored.courier_id);
    }

    #[tokio::test]
    async fn courier_must_be_waiting_to_claim() {
        let fx = waiting_order().await;
        let idle = courier_user(&fx.state, "ivan", CourierStatus::Unactive).await;

        let err = claim_order(&fx.state, idle, fx.order_id).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));

        let mut tx = fx.state.store.begin().await.unwrap();
        let order = tx.order(fx.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::WaitingForCourier);
        assert_eq!(order.courier_id, None);
    }

    #[tokio::test]
    async fn wrong_code_leaves_order_out_for_delivery() {
        let fx = waiting_order().await;
        let courier = courier_user(&fx.state, "dora", CourierStatus::Waiting).await;
        claim_order(&fx.state, courier, fx.order_id).await.unwrap();

        let err = release_courier(&fx.state, courier, fx.order_id, &wrong(fx.code)).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let mut tx = fx.state.store.begin().await.unwrap();
        let order = tx.order(fx.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::OutForDelivery);
        let checker = tx.checker(fx.order_id).await.unwrap().unwrap();
        assert_eq!(checker.failed_attempts, 1);
    }

    #[tokio::test]
    async fn right_code_closes_order_and_frees_courier() {
        let fx = waiting_order().await;
        let courier = courier_user(&fx.state, "eve", CourierStatus::Waiting).await;
        claim_order(&fx.state, courier, fx.order_id).await.unwrap();

        let order = release_courier(&fx.state, courier, fx.order_id, &fx.code.to_string())
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Closed);
        assert!(order.delivery_secs.is_some());

        let profile = courier_profile(&fx.state, courier).await.unwrap();
        assert_eq!(profile.courier.status, CourierStatus::Waiting);
        assert_eq!(profile.courier.completed_orders, 1);

        let mut tx = fx.state.store.begin().await.unwrap();
        assert!(tx.checker(fx.order_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn code_locks_after_max_attempts() {
        let fx = waiting_order().await;
        let courier = courier_user(&fx.state, "finn", CourierStatus::Waiting).await;
        claim_order(&fx.state, courier, fx.order_id).await.unwrap();

        for _ in 0..fx.state.config.max_code_attempts {
            let err = release_courier(&fx.state, courier, fx.order_id, &wrong(fx.code)).await;
            assert!(matches!(err, Err(AppError::Validation(_))));
        }

        let locked = release_courier(&fx.state, courier, fx.order_id, &fx.code.to_string()).await;
        assert!(matches!(locked, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn rotated_code_unlocks_release_after_max_attempts() {
        let fx = waiting_order().await;
        let courier = courier_user(&fx.state, "jon", CourierStatus::Waiting).await;
        claim_order(&fx.state, courier, fx.order_id).await.unwrap();

        for _ in 0..fx.state.config.max_code_attempts {
            let _ = release_courier(&fx.state, courier, fx.order_id, &wrong(fx.code)).await;
        }

        let rotated = rotate_code(&fx.state, fx.customer, fx.order_id).await.unwrap();
        assert_eq!(
            show_code(&fx.state, fx.customer, fx.order_id).await.unwrap().code,
            rotated.code
        );

        let mut tx = fx.state.store.begin().await.unwrap();
        assert_eq!(tx.checker(fx.order_id).await.unwrap().unwrap().failed_attempts, 0);
        drop(tx);

        let order = release_courier(&fx.state, courier, fx.order_id, &rotated.code.to_string())
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Closed);
    }

    #[tokio::test]
    async fn only_the_owner_sees_or_rotates_the_code() {
        let fx = waiting_order().await;
        let stranger = Uuid::new_v4();

        let shown = show_code(&fx.state, stranger, fx.order_id).await;
        assert!(matches!(shown, Err(AppError::NotFound(_))));
        let rotated = rotate_code(&fx.state, stranger, fx.order_id).await;
        assert!(matches!(rotated, Err(AppError::NotFound(_))));

        let code = show_code(&fx.state, fx.customer, fx.order_id).await.unwrap();
        assert_eq!(code.code, fx.code);
    }

    #[tokio::test]
    async fn finished_orders_have_no_code_to_rotate() {
        let fx = waiting_order().await;
        let courier = courier_user(&fx.state, "kim", CourierStatus::Waiting).await;
        claim_order(&fx.state, courier, fx.order_id).await.unwrap();
        release_courier(&fx.state, courier, fx.order_id, &fx.code.to_string())
            .await
            .unwrap();

        let closed = rotate_code(&fx.state, fx.customer, fx.order_id).await;
        assert!(matches!(closed, Err(AppError::Conflict(_))));

        let other = waiting_order().await;
        let mut tx = other.state.store.begin().await.unwrap();
        let mut order = tx.lock_order(other.order_id).await.unwrap().unwrap();
        order.status = OrderStatus::Cancelled;
        tx.put_order(order).await.unwrap();
        tx.commit().await.unwrap();

        let cancelled = rotate_code(&other.state, other.customer, other.order_id).await;
        assert!(matches!(cancelled, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn another_courier_cannot_release() {
        let fx = waiting_order().await;
        let owner = courier_user(&fx.state, "gus", CourierStatus::Waiting).await;
        let other = courier_user(&fx.state, "hal", CourierStatus::Waiting).await;
        claim_order(&fx.state, owner, fx.order_id).await.unwrap();

        let err = release_courier(&fx.state, other, fx.order_id, &fx.code.to_string()).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn courier_toggles_availability() {
        let fx = waiting_order().await;
        let courier = courier_user(&fx.state, "ida", CourierStatus::Unactive).await;

        let updated = set_courier_status(&fx.state, courier, CourierStatus::Waiting)
            .await
            .unwrap();
        assert_eq!(updated.status, CourierStatus::Waiting);

        let same = set_courier_status(&fx.state, courier, CourierStatus::Waiting).await;
        assert!(matches!(same, Err(AppError::Conflict(_))));

        let manual = set_courier_status(&fx.state, courier, CourierStatus::Active).await;
        assert!(matches!(manual, Err(AppError::Validation(_))));

        claim_order(&fx.state, courier, fx.order_id).await.unwrap();
        let busy = set_courier_status(&fx.state, courier, CourierStatus::Unactive).await;
        assert!(matches!(busy, Err(AppError::Conflict(_))));
    }
}
