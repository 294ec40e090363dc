//! Persistent store seam.
//!
//! Every core operation runs inside one [`Transaction`]. Writes are staged on
//! the transaction and become visible to other transactions only on
//! [`Transaction::commit`]; dropping an uncommitted transaction rolls it back.
//!
//! ## Row locks
//!
//! [`Transaction::lock`] takes a pessimistic lock on one row (the equivalent
//! of `SELECT ... FOR UPDATE`) that is held until the transaction ends. A
//! second transaction locking the same row waits until the first one commits
//! or rolls back, then re-reads the committed state. Callers that lock more
//! than one row must acquire them in the fixed order `User`, `Dish`, `Order`,
//! `Courier`, and several rows of one kind in ascending id order.
//!
//! A dish row lock covers the dish and the set of line items referencing it:
//! anything that adds a line item, reprices the dish or deletes it holds that
//! lock until commit.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::courier::{Courier, CourierStatus};
use crate::models::dish::Dish;
use crate::models::order::{Address, DeliveryChecker, Order, OrderDetails, OrderLineItem, OrderStatus};
use crate::models::review::{Review, ReviewStatus};
use crate::models::user::{RevokedToken, User};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out waiting for lock on {0:?}")]
    LockTimeout(RowKey),

    #[error("store state poisoned")]
    Poisoned,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Lockable row identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    User(Uuid),
    Dish(Uuid),
    Order(Uuid),
    Courier(Uuid),
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn customer(customer_id: Uuid) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.customer_id.is_none_or(|id| order.customer_id == id)
            && self.courier_id.is_none_or(|id| order.courier_id == Some(id))
            && self.status.is_none_or(|status| order.status == status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub user_id: Option<Uuid>,
    pub dish_id: Option<Uuid>,
    pub status: Option<ReviewStatus>,
}

impl ReviewFilter {
    pub fn matches(&self, review: &Review) -> bool {
        self.user_id.is_none_or(|id| review.user_id == id)
            && self.dish_id.is_none_or(|id| review.dish_id == id)
            && self.status.is_none_or(|status| review.status == status)
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: Transaction;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

#[async_trait]
pub trait Transaction: Send + Sized {
    /// Locks a row for the remaining lifetime of the transaction. Locking a
    /// row the transaction already holds is a no-op.
    async fn lock(&mut self, key: RowKey) -> StoreResult<()>;

    async fn lock_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        self.lock(RowKey::User(id)).await?;
        self.user(id).await
    }

    async fn lock_dish(&mut self, id: Uuid) -> StoreResult<Option<Dish>> {
        self.lock(RowKey::Dish(id)).await?;
        self.dish(id).await
    }

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        self.lock(RowKey::Order(id)).await?;
        self.order(id).await
    }

    async fn lock_courier(&mut self, id: Uuid) -> StoreResult<Option<Courier>> {
        self.lock(RowKey::Courier(id)).await?;
        self.courier(id).await
    }

    // --- users ---

    async fn user(&mut self, id: Uuid) -> StoreResult<Option<User>>;

    async fn user_by_name(&mut self, name: &str) -> StoreResult<Option<User>>;

    async fn users(&mut self) -> StoreResult<Vec<User>>;

    async fn put_user(&mut self, user: User) -> StoreResult<()>;

    // --- couriers ---

    async fn courier(&mut self, id: Uuid) -> StoreResult<Option<Courier>>;

    async fn courier_by_user(&mut self, user_id: Uuid) -> StoreResult<Option<Courier>>;

    async fn couriers(&mut self, status: Option<CourierStatus>) -> StoreResult<Vec<Courier>>;

    async fn put_courier(&mut self, courier: Courier) -> StoreResult<()>;

    async fn delete_courier(&mut self, id: Uuid) -> StoreResult<()>;

    // --- catalog ---

    async fn dish(&mut self, id: Uuid) -> StoreResult<Option<Dish>>;

    async fn dishes(&mut self) -> StoreResult<Vec<Dish>>;

    async fn put_dish(&mut self, dish: Dish) -> StoreResult<()>;

    async fn delete_dish(&mut self, id: Uuid) -> StoreResult<()>;

    // --- orders ---

    async fn order(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn orders(&mut self, filter: &OrderFilter) -> StoreResult<Vec<Order>>;

    async fn put_order(&mut self, order: Order) -> StoreResult<()>;

    async fn delete_order(&mut self, id: Uuid) -> StoreResult<()>;

    async fn line_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderLineItem>>;

    async fn line_items_for_dish(&mut self, dish_id: Uuid) -> StoreResult<Vec<OrderLineItem>>;

    async fn put_line_item(&mut self, item: OrderLineItem) -> StoreResult<()>;

    async fn delete_line_items(&mut self, order_id: Uuid) -> StoreResult<()>;

    async fn address(&mut self, order_id: Uuid) -> StoreResult<Option<Address>>;

    async fn put_address(&mut self, address: Address) -> StoreResult<()>;

    /// Orders matching `filter`, each joined with its line items, their
    /// dishes and the delivery address in one query.
    async fn order_details(&mut self, filter: &OrderFilter) -> StoreResult<Vec<OrderDetails>>;

    // --- delivery checkers ---

    async fn checker(&mut self, order_id: Uuid) -> StoreResult<Option<DeliveryChecker>>;

    async fn put_checker(&mut self, checker: DeliveryChecker) -> StoreResult<()>;

    async fn delete_checker(&mut self, order_id: Uuid) -> StoreResult<()>;

    // --- reviews ---

    async fn review(&mut self, id: Uuid) -> StoreResult<Option<Review>>;

    async fn reviews(&mut self, filter: &ReviewFilter) -> StoreResult<Vec<Review>>;

    async fn put_review(&mut self, review: Review) -> StoreResult<()>;

    /// Whether `user_id` has a Closed order containing `dish_id`.
    async fn has_purchased(&mut self, user_id: Uuid, dish_id: Uuid) -> StoreResult<bool>;

    // --- revoked tokens ---

    async fn revoke_token(&mut self, token: RevokedToken) -> StoreResult<()>;

    async fn is_revoked(&mut self, token: &str) -> StoreResult<bool>;

    async fn commit(self) -> StoreResult<()>;
}
