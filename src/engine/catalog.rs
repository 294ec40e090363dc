//! Catalog reads through the dish cache, and the admin mutations that keep
//! open carts consistent with dish prices.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::recompute_total;
use crate::error::AppError;
use crate::models::dish::Dish;
use crate::models::order::OrderStatus;
use crate::state::AppState;
use crate::store::{Store, Transaction};

const ALL_DISHES: &str = "dishes";

fn record_lookup<S: Store>(state: &AppState<S>, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    state
        .metrics
        .catalog_cache_requests_total
        .with_label_values(&[result])
        .inc();
}

pub async fn list_dishes<S: Store>(state: &AppState<S>) -> Result<Arc<Vec<Dish>>, AppError> {
    if let Some(dishes) = state.dish_list_cache.get(ALL_DISHES) {
        record_lookup(state, true);
        return Ok(dishes);
    }
    record_lookup(state, false);

    let generation = state.dish_list_cache.generation();
    let mut tx = state.store.begin().await?;
    let mut dishes = tx.dishes().await?;
    dishes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    let dishes = Arc::new(dishes);

    if !dishes.is_empty() {
        state
            .dish_list_cache
            .insert_if_current(ALL_DISHES, dishes.clone(), generation);
    }
    Ok(dishes)
}

pub async fn get_dish<S: Store>(state: &AppState<S>, dish_id: Uuid) -> Result<Dish, AppError> {
    let key = dish_id.to_string();
    if let Some(dish) = state.dish_cache.get(&key) {
        record_lookup(state, true);
        return Ok(dish);
    }
    record_lookup(state, false);

    let generation = state.dish_cache.generation();
    let mut tx = state.store.begin().await?;
    let dish = tx
        .dish(dish_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("dish {dish_id} not found")))?;

    state.dish_cache.insert_if_current(key, dish.clone(), generation);
    Ok(dish)
}

fn invalidate<S: Store>(state: &AppState<S>) {
    state.dish_list_cache.invalidate_all();
    state.dish_cache.invalidate_all();
    debug!("catalog cache invalidated");
}

/// Sets a new price and re-totals every open cart that contains the dish.
/// Submitted orders keep the price they were placed at.
pub async fn change_dish_price<S: Store>(
    state: &AppState<S>,
    dish_id: Uuid,
    price: Decimal,
) -> Result<Dish, AppError> {
    if price <= Decimal::ZERO {
        return Err(AppError::Validation("price must be > 0".to_string()));
    }

    let mut tx = state.store.begin().await?;
    let mut dish = tx
        .lock_dish(dish_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("dish {dish_id} not found")))?;
    let previous = dish.price;
    dish.price = price;
    tx.put_dish(dish.clone()).await?;

    // The dish lock keeps new line items out until commit; carts are locked
    // in id order.
    let mut order_ids: Vec<Uuid> = tx
        .line_items_for_dish(dish_id)
        .await?
        .into_iter()
        .map(|item| item.order_id)
        .collect();
    order_ids.sort();
    order_ids.dedup();

    let mut recomputed = 0usize;
    for order_id in order_ids {
        let Some(mut order) = tx.lock_order(order_id).await? else {
            continue;
        };
        if order.status != OrderStatus::Cart {
            continue;
        }
        recompute_total(&mut tx, &mut order).await?;
        tx.put_order(order).await?;
        recomputed += 1;
    }

    tx.commit().await?;
    invalidate(state);

    info!(dish_id = %dish_id, from = %previous, to = %price, carts = recomputed, "dish price changed");
    Ok(dish)
}

pub async fn delete_dish<S: Store>(state: &AppState<S>, dish_id: Uuid) -> Result<(), AppError> {
    let mut tx = state.store.begin().await?;
    if tx.lock_dish(dish_id).await?.is_none() {
        return Err(AppError::NotFound(format!("dish {dish_id} not found")));
    }

    for item in tx.line_items_for_dish(dish_id).await? {
        let Some(order) = tx.order(item.order_id).await? else {
            continue;
        };
        if !order.status.is_finished() {
            warn!(dish_id = %dish_id, order_id = %order.id, "delete of a dish in an open order");
            return Err(AppError::Conflict(format!(
                "dish {dish_id} is part of open order {}",
                order.id
            )));
        }
    }

    tx.delete_dish(dish_id).await?;
    tx.commit().await?;
    invalidate(state);

    info!(dish_id = %dish_id, "dish deleted");
    Ok(())
}
