//! Order lifecycle: the customer's cart, submission to the kitchen and the
//! staff hand-off to couriers.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::confirmation::new_checker;
use crate::error::AppError;
use crate::models::order::{
    line_total, Address, Order, OrderDetails, OrderEvent, OrderLineItem, OrderStatus,
};
use crate::models::user::Role;
use crate::state::AppState;
use crate::store::{OrderFilter, RowKey, Store, Transaction};

pub const MAX_LINE_ITEM_COUNT: u32 = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedOrder {
    pub order: Order,
    pub code: u32,
}

async fn open_cart<T: Transaction>(tx: &mut T, customer_id: Uuid) -> Result<Option<Order>, AppError> {
    let filter = OrderFilter::customer(customer_id).with_status(OrderStatus::Cart);
    Ok(tx.orders(&filter).await?.into_iter().next())
}

async fn lock_customer<T: Transaction>(tx: &mut T, customer_id: Uuid) -> Result<(), AppError> {
    tx.lock_user(customer_id)
        .await?
        .filter(|user| user.is_active())
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("user {customer_id} not found")))
}

/// Recomputes `order.price` from its persisted line items and current dish
/// prices. Client-supplied totals are never used.
pub(crate) async fn recompute_total<T: Transaction>(
    tx: &mut T,
    order: &mut Order,
) -> Result<(), AppError> {
    let items = tx.line_items(order.id).await?;

    let mut prices = HashMap::with_capacity(items.len());
    for item in &items {
        let dish = tx.dish(item.dish_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "order {} references missing dish {}",
                order.id, item.dish_id
            ))
        })?;
        prices.insert(dish.id, dish.price);
    }

    order.price = line_total(&items, |dish_id| prices.get(&dish_id).copied()).ok_or_else(|| {
        AppError::Validation(format!("total of order {} is out of range", order.id))
    })?;
    Ok(())
}

/// Adds `quantity` units of a dish to the customer's cart, opening a cart
/// if none exists.
pub async fn add_line_item<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
    dish_id: Uuid,
    quantity: u32,
) -> Result<Order, AppError> {
    if quantity == 0 {
        return Err(AppError::Validation("quantity must be > 0".to_string()));
    }

    let mut tx = state.store.begin().await?;
    lock_customer(&mut tx, customer_id).await?;

    let dish = tx
        .lock_dish(dish_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("dish {dish_id} not found")))?;
    if !dish.is_orderable() {
        return Err(AppError::Validation(format!(
            "dish {dish_id} has no positive price"
        )));
    }

    let mut cart = match open_cart(&mut tx, customer_id).await? {
        Some(cart) => cart,
        None => {
            let cart = Order::new_cart(customer_id);
            info!(customer_id = %customer_id, order_id = %cart.id, "cart opened");
            cart
        }
    };
    tx.lock(RowKey::Order(cart.id)).await?;

    let existing = tx
        .line_items(cart.id)
        .await?
        .into_iter()
        .find(|item| item.dish_id == dish_id);
    let count = match existing {
        Some(item) => item
            .count
            .checked_add(quantity)
            .ok_or_else(|| AppError::Validation("line item count overflow".to_string()))?,
        None => quantity,
    };
    if count > MAX_LINE_ITEM_COUNT {
        return Err(AppError::Validation(format!(
            "at most {MAX_LINE_ITEM_COUNT} units of one dish per order"
        )));
    }
    tx.put_line_item(OrderLineItem {
        order_id: cart.id,
        dish_id,
        count,
    })
    .await?;

    recompute_total(&mut tx, &mut cart).await?;
    cart.updated_at = Utc::now();
    tx.put_order(cart.clone()).await?;
    tx.commit().await?;

    info!(
        customer_id = %customer_id,
        order_id = %cart.id,
        dish_id = %dish_id,
        count,
        price = %cart.price,
        "dish added to cart"
    );
    Ok(cart)
}

/// Sends the customer's cart to the kitchen, binding the delivery address
/// and issuing the delivery code.
pub async fn submit_order<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
    mut address: Address,
) -> Result<SubmittedOrder, AppError> {
    let missing = address.missing_fields();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "address is incomplete: missing {}",
            missing.join(", ")
        )));
    }

    let mut tx = state.store.begin().await?;
    lock_customer(&mut tx, customer_id).await?;

    let cart_id = open_cart(&mut tx, customer_id)
        .await?
        .map(|cart| cart.id)
        .ok_or_else(|| AppError::NotFound("no open cart".to_string()))?;
    let mut order = tx
        .lock_order(cart_id)
        .await?
        .ok_or_else(|| AppError::NotFound("no open cart".to_string()))?;

    if order.status != OrderStatus::Cart {
        return Err(AppError::Conflict(format!(
            "order {} is already {:?}",
            order.id, order.status
        )));
    }
    if tx.line_items(order.id).await?.is_empty() {
        return Err(AppError::Validation("cart is empty".to_string()));
    }

    let now = Utc::now();
    recompute_total(&mut tx, &mut order).await?;
    order.advance(OrderStatus::Cooking, Role::Customer, now)?;

    address.order_id = order.id;
    let checker = new_checker(order.id, now);
    let code = checker.code;

    tx.put_address(address).await?;
    tx.put_checker(checker).await?;
    tx.put_order(order.clone()).await?;
    tx.commit().await?;

    info!(customer_id = %customer_id, order_id = %order.id, price = %order.price, "order sent to kitchen");
    state.publish(OrderEvent::from(&order));

    Ok(SubmittedOrder { order, code })
}

/// Kitchen hand-off: a Cooking order becomes Cancelled or WaitingForCourier.
pub async fn staff_advance_order<S: Store>(
    state: &AppState<S>,
    staff_id: Uuid,
    order_id: Uuid,
    target: OrderStatus,
) -> Result<Order, AppError> {
    if !matches!(
        target,
        OrderStatus::Cancelled | OrderStatus::WaitingForCourier
    ) {
        return Err(AppError::Validation(format!(
            "staff can only move orders to Cancelled or WaitingForCourier, got {target:?}"
        )));
    }

    let mut tx = state.store.begin().await?;
    let mut order = tx
        .lock_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.status != OrderStatus::Cooking {
        warn!(order_id = %order_id, status = ?order.status, "staff change on order that is not cooking");
        return Err(AppError::Conflict(format!(
            "order {order_id} is {:?}, not Cooking",
            order.status
        )));
    }

    order.advance(target, Role::Staff, Utc::now())?;
    if target == OrderStatus::Cancelled {
        tx.delete_checker(order.id).await?;
    }
    tx.put_order(order.clone()).await?;
    tx.commit().await?;

    info!(staff_id = %staff_id, order_id = %order_id, status = ?target, "kitchen updated order");
    state.publish(OrderEvent::from(&order));

    Ok(order)
}

/// Discards the customer's open cart together with its line items.
pub async fn delete_cart_order<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
) -> Result<Uuid, AppError> {
    let mut tx = state.store.begin().await?;
    lock_customer(&mut tx, customer_id).await?;

    let cart_id = open_cart(&mut tx, customer_id)
        .await?
        .map(|cart| cart.id)
        .ok_or_else(|| AppError::NotFound("no open cart".to_string()))?;
    let cart = tx
        .lock_order(cart_id)
        .await?
        .filter(|order| order.status == OrderStatus::Cart)
        .ok_or_else(|| AppError::NotFound("no open cart".to_string()))?;

    tx.delete_line_items(cart.id).await?;
    tx.delete_order(cart.id).await?;
    tx.commit().await?;

    info!(customer_id = %customer_id, order_id = %cart.id, "cart deleted");
    Ok(cart.id)
}

pub async fn list_customer_orders<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
) -> Result<Vec<Order>, AppError> {
    let mut tx = state.store.begin().await?;
    Ok(tx.orders(&OrderFilter::customer(customer_id)).await?)
}

pub async fn customer_order_details<S: Store>(
    state: &AppState<S>,
    customer_id: Uuid,
    order_id: Uuid,
) -> Result<OrderDetails, AppError> {
    let mut tx = state.store.begin().await?;
    tx.order_details(&OrderFilter::customer(customer_id))
        .await?
        .into_iter()
        .find(|details| details.order.id == order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

pub async fn list_cooking_orders<S: Store>(
    state: &AppState<S>,
) -> Result<Vec<OrderDetails>, AppError> {
    let mut tx = state.store.begin().await?;
    Ok(tx
        .order_details(&OrderFilter::status(OrderStatus::Cooking))
        .await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;
    use crate::models::dish::Dish;
    use crate::models::user::User;
    use crate::store::memory::MemoryStore;

    async fn setup() -> (Arc<AppState<MemoryStore>>, Uuid, Dish, Dish) {
        let state = Arc::new(AppState::new(MemoryStore::default(), Config::default()));
        let customer = User::new("carol", "carol@example.com", "+1000");
        let a = Dish::new("dumplings", Decimal::from(100), Uuid::new_v4());
        let b = Dish::new("tea", Decimal::from(50), Uuid::new_v4());

        let mut tx = state.store.begin().await.unwrap();
        tx.put_user(customer.clone()).await.unwrap();
        tx.put_dish(a.clone()).await.unwrap();
        tx.put_dish(b.clone()).await.unwrap();
        tx.commit().await.unwrap();

        (state, customer.id, a, b)
    }

    fn address() -> Address {
        Address {
            order_id: Uuid::nil(),
            phone: "+1000".to_string(),
            street: "Baker".to_string(),
            house_number: "221".to_string(),
            apartment: "B".to_string(),
            entry_code: "42".to_string(),
        }
    }

    #[tokio::test]
    async fn cart_total_is_sum_of_count_times_price() {
        let (state, customer, a, b) = setup().await;

        add_line_item(&state, customer, a.id, 1).await.unwrap();
        add_line_item(&state, customer, a.id, 1).await.unwrap();
        let cart = add_line_item(&state, customer, b.id, 1).await.unwrap();

        assert_eq!(cart.price, Decimal::from(250));
        assert_eq!(cart.status, OrderStatus::Cart);
        assert_eq!(list_customer_orders(&state, customer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_line_item_is_rejected() {
        let (state, customer, a, _) = setup().await;

        let err = add_line_item(&state, customer, a.id, u32::MAX).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        add_line_item(&state, customer, a.id, MAX_LINE_ITEM_COUNT).await.unwrap();
        let err = add_line_item(&state, customer, a.id, 1).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let cart = list_customer_orders(&state, customer).await.unwrap();
        assert_eq!(cart[0].price, Decimal::from(100 * MAX_LINE_ITEM_COUNT));
    }

    #[tokio::test]
    async fn total_out_of_decimal_range_is_rejected() {
        let (state, customer, _, _) = setup().await;
        let pricey = Dish::new("caviar", Decimal::MAX, Uuid::new_v4());
        let mut tx = state.store.begin().await.unwrap();
        tx.put_dish(pricey.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let err = add_line_item(&state, customer, pricey.id, 2).await;
        assert!(matches!(err, Err(AppError::Validation(_))));
        assert!(list_customer_orders(&state, customer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_do_not_lose_updates() {
        let (state, customer, a, _) = setup().await;
        let dish_id = a.id;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { add_line_item(&state, customer, dish_id, 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let orders = list_customer_orders(&state, customer).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].price, Decimal::from(1600));
    }

    #[tokio::test]
    async fn unknown_or_free_dish_is_rejected() {
        let (state, customer, _, _) = setup().await;
        let free = Dish::new("water", Decimal::ZERO, Uuid::new_v4());
        let mut tx = state.store.begin().await.unwrap();
        tx.put_dish(free.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let missing = add_line_item(&state, customer, Uuid::new_v4(), 1).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let zero_price = add_line_item(&state, customer, free.id, 1).await;
        assert!(matches!(zero_price, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn submit_requires_cart_and_complete_address() {
        let (state, customer, a, _) = setup().await;

        let no_cart = submit_order(&state, customer, address()).await;
        assert!(matches!(no_cart, Err(AppError::NotFound(_))));

        add_line_item(&state, customer, a.id, 1).await.unwrap();
        let mut incomplete = address();
        incomplete.entry_code.clear();
        let err = submit_order(&state, customer, incomplete).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let submitted = submit_order(&state, customer, address()).await.unwrap();
        assert_eq!(submitted.order.status, OrderStatus::Cooking);
        assert!((100_000..=999_999).contains(&submitted.code));

        let mut tx = state.store.begin().await.unwrap();
        let checker = tx.checker(submitted.order.id).await.unwrap().unwrap();
        assert_eq!(checker.code, submitted.code);
        let stored_address = tx.address(submitted.order.id).await.unwrap().unwrap();
        assert_eq!(stored_address.order_id, submitted.order.id);
    }

    #[tokio::test]
    async fn staff_can_only_move_cooking_orders() {
        let (state, customer, a, _) = setup().await;
        let staff = Uuid::new_v4();

        add_line_item(&state, customer, a.id, 1).await.unwrap();
        let submitted = submit_order(&state, customer, address()).await.unwrap();
        let id = submitted.order.id;

        let invalid = staff_advance_order(&state, staff, id, OrderStatus::Closed).await;
        assert!(matches!(invalid, Err(AppError::Validation(_))));

        let order = staff_advance_order(&state, staff, id, OrderStatus::WaitingForCourier)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::WaitingForCourier);
        assert!(order.preparation_secs.is_some());

        let again = staff_advance_order(&state, staff, id, OrderStatus::Cancelled).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn cancelling_removes_the_delivery_code() {
        let (state, customer, a, _) = setup().await;

        add_line_item(&state, customer, a.id, 1).await.unwrap();
        let submitted = submit_order(&state, customer, address()).await.unwrap();
        staff_advance_order(&state, Uuid::new_v4(), submitted.order.id, OrderStatus::Cancelled)
            .await
            .unwrap();

        let mut tx = state.store.begin().await.unwrap();
        assert!(tx.checker(submitted.order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cart_removes_order_and_items() {
        let (state, customer, a, b) = setup().await;

        add_line_item(&state, customer, a.id, 2).await.unwrap();
        let cart = add_line_item(&state, customer, b.id, 1).await.unwrap();

        let deleted = delete_cart_order(&state, customer).await.unwrap();
        assert_eq!(deleted, cart.id);

        let mut tx = state.store.begin().await.unwrap();
        assert!(tx.order(cart.id).await.unwrap().is_none());
        assert!(tx.line_items(cart.id).await.unwrap().is_empty());

        let again = delete_cart_order(&state, customer).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn submitted_order_is_not_reused_as_cart() {
        let (state, customer, a, b) = setup().await;

        add_line_item(&state, customer, a.id, 1).await.unwrap();
        let first = submit_order(&state, customer, address()).await.unwrap();
        let second = add_line_item(&state, customer, b.id, 1).await.unwrap();

        assert_ne!(first.order.id, second.id);
        assert_eq!(second.price, Decimal::from(50));

        let details = customer_order_details(&state, customer, first.order.id)
            .await
            .unwrap();
        assert_eq!(details.items.len(), 1);
        assert_eq!(details.order.price, Decimal::from(100));
    }
}
