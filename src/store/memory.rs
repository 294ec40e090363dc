//! In-memory store.
//!
//! [`MemoryStore`] keeps committed rows behind a single `RwLock` and hands out
//! [`MemoryTx`] transactions that stage their writes locally. Row locks are
//! per-key async mutexes, so a transaction waiting on a lock yields instead of
//! blocking the runtime.
//!
//! ## Limitations
//!
//! - **No durability**: all state is lost when the process exits
//! - **Single-process only**: locks do not coordinate across processes

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{OrderFilter, ReviewFilter, RowKey, Store, StoreError, StoreResult, Transaction};
use crate::models::courier::{Courier, CourierStatus};
use crate::models::dish::Dish;
use crate::models::order::{
    Address, DeliveryChecker, LineItemDetails, Order, OrderDetails, OrderLineItem, OrderStatus,
};
use crate::models::review::Review;
use crate::models::user::{RevokedToken, User};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Poisoned
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    couriers: HashMap<Uuid, Courier>,
    dishes: HashMap<Uuid, Dish>,
    orders: HashMap<Uuid, Order>,
    line_items: HashMap<(Uuid, Uuid), OrderLineItem>,
    addresses: HashMap<Uuid, Address>,
    checkers: HashMap<Uuid, DeliveryChecker>,
    reviews: HashMap<Uuid, Review>,
    revoked_tokens: HashMap<String, RevokedToken>,
}

/// Uncommitted writes for one table. `None` marks a deleted row.
#[derive(Debug)]
struct Overlay<K, V> {
    writes: HashMap<K, Option<V>>,
}

impl<K, V> Default for Overlay<K, V> {
    fn default() -> Self {
        Self {
            writes: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Overlay<K, V> {
    fn get(&self, committed: &HashMap<K, V>, key: &K) -> Option<V> {
        match self.writes.get(key) {
            Some(staged) => staged.clone(),
            None => committed.get(key).cloned(),
        }
    }

    fn scan(&self, committed: &HashMap<K, V>, keep: impl Fn(&V) -> bool) -> Vec<V> {
        let mut rows: Vec<V> = committed
            .iter()
            .filter(|(key, value)| !self.writes.contains_key(*key) && keep(*value))
            .map(|(_, value)| value.clone())
            .collect();
        rows.extend(self.writes.values().flatten().filter(|v| keep(*v)).cloned());
        rows
    }

    fn staged(&self) -> impl Iterator<Item = &V> {
        self.writes.values().flatten()
    }

    fn put(&mut self, key: K, value: V) {
        self.writes.insert(key, Some(value));
    }

    fn remove(&mut self, key: K) {
        self.writes.insert(key, None);
    }

    fn apply(self, committed: &mut HashMap<K, V>) {
        for (key, write) in self.writes {
            match write {
                Some(value) => {
                    committed.insert(key, value);
                }
                None => {
                    committed.remove(&key);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Staged {
    users: Overlay<Uuid, User>,
    couriers: Overlay<Uuid, Courier>,
    dishes: Overlay<Uuid, Dish>,
    orders: Overlay<Uuid, Order>,
    line_items: Overlay<(Uuid, Uuid), OrderLineItem>,
    addresses: Overlay<Uuid, Address>,
    checkers: Overlay<Uuid, DeliveryChecker>,
    reviews: Overlay<Uuid, Review>,
    revoked_tokens: Overlay<String, RevokedToken>,
}

impl Staged {
    /// Rejects staged rows that would collide with a unique key.
    fn check_unique(&self, tables: &Tables) -> StoreResult<()> {
        for user in self.users.staged() {
            let clash = self.users.scan(&tables.users, |other| {
                other.id != user.id
                    && (other.name == user.name
                        || other.email == user.email
                        || other.phone == user.phone)
            });
            if !clash.is_empty() {
                return Err(StoreError::UniqueViolation("user".to_string()));
            }
        }

        for courier in self.couriers.staged() {
            let clash = self.couriers.scan(&tables.couriers, |other| {
                other.id != courier.id && other.user_id == courier.user_id
            });
            if !clash.is_empty() {
                return Err(StoreError::UniqueViolation("courier".to_string()));
            }
        }

        for review in self.reviews.staged() {
            let clash = self.reviews.scan(&tables.reviews, |other| {
                other.id != review.id
                    && other.user_id == review.user_id
                    && other.dish_id == review.dish_id
            });
            if !clash.is_empty() {
                return Err(StoreError::UniqueViolation("review".to_string()));
            }
        }

        Ok(())
    }

    fn apply(self, tables: &mut Tables) {
        self.users.apply(&mut tables.users);
        self.couriers.apply(&mut tables.couriers);
        self.dishes.apply(&mut tables.dishes);
        self.orders.apply(&mut tables.orders);
        self.line_items.apply(&mut tables.line_items);
        self.addresses.apply(&mut tables.addresses);
        self.checkers.apply(&mut tables.checkers);
        self.reviews.apply(&mut tables.reviews);
        self.revoked_tokens.apply(&mut tables.revoked_tokens);
    }
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: DashMap<RowKey, Arc<Mutex<()>>>,
    lock_timeout: Duration,
}

/// In-memory [`Store`] with pessimistic row locks and atomic commit.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                lock_timeout,
            }),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        Ok(MemoryTx {
            shared: self.shared.clone(),
            staged: Staged::default(),
            held: HashMap::new(),
        })
    }
}

/// Transaction over a [`MemoryStore`]. Dropping it without calling
/// [`Transaction::commit`] discards the staged writes and releases its locks.
#[derive(Debug)]
pub struct MemoryTx {
    shared: Arc<Shared>,
    staged: Staged,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
}

impl MemoryTx {
    fn view<R>(&self, read: impl FnOnce(&Tables, &Staged) -> R) -> StoreResult<R> {
        let tables = self.shared.tables.read().map_err(poison_err)?;
        Ok(read(&tables, &self.staged))
    }
}

fn resolve_details(tables: &Tables, staged: &Staged, orders: Vec<Order>) -> Vec<OrderDetails> {
    let mut items_by_order: HashMap<Uuid, Vec<OrderLineItem>> = HashMap::new();
    for item in staged.line_items.scan(&tables.line_items, |_| true) {
        items_by_order.entry(item.order_id).or_default().push(item);
    }

    orders
        .into_iter()
        .map(|order| {
            let items = items_by_order
                .remove(&order.id)
                .unwrap_or_default()
                .into_iter()
                .map(|item| LineItemDetails {
                    dish: staged.dishes.get(&tables.dishes, &item.dish_id),
                    dish_id: item.dish_id,
                    count: item.count,
                })
                .collect();
            let address = staged.addresses.get(&tables.addresses, &order.id);

            OrderDetails {
                order,
                items,
                address,
            }
        })
        .collect()
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn lock(&mut self, key: RowKey) -> StoreResult<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let row = self.shared.row_locks.entry(key).or_default().clone();
        let guard = tokio::time::timeout(self.shared.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(key))?;

        self.held.insert(key, guard);
        Ok(())
    }

    async fn user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        self.view(|t, s| s.users.get(&t.users, &id))
    }

    async fn user_by_name(&mut self, name: &str) -> StoreResult<Option<User>> {
        self.view(|t, s| {
            s.users
                .scan(&t.users, |user| user.name == name && user.is_active())
                .into_iter()
                .next()
        })
    }

    async fn users(&mut self) -> StoreResult<Vec<User>> {
        self.view(|t, s| s.users.scan(&t.users, User::is_active))
    }

    async fn put_user(&mut self, user: User) -> StoreResult<()> {
        self.staged.users.put(user.id, user);
        Ok(())
    }

    async fn courier(&mut self, id: Uuid) -> StoreResult<Option<Courier>> {
        self.view(|t, s| s.couriers.get(&t.couriers, &id))
    }

    async fn courier_by_user(&mut self, user_id: Uuid) -> StoreResult<Option<Courier>> {
        self.view(|t, s| {
            s.couriers
                .scan(&t.couriers, |courier| courier.user_id == user_id)
                .into_iter()
                .next()
        })
    }

    async fn couriers(&mut self, status: Option<CourierStatus>) -> StoreResult<Vec<Courier>> {
        self.view(|t, s| {
            s.couriers.scan(&t.couriers, |courier| {
                status.is_none_or(|status| courier.status == status)
            })
        })
    }

    async fn put_courier(&mut self, courier: Courier) -> StoreResult<()> {
        self.staged.couriers.put(courier.id, courier);
        Ok(())
    }

    async fn delete_courier(&mut self, id: Uuid) -> StoreResult<()> {
        self.staged.couriers.remove(id);
        Ok(())
    }

    async fn dish(&mut self, id: Uuid) -> StoreResult<Option<Dish>> {
        self.view(|t, s| s.dishes.get(&t.dishes, &id))
    }

    async fn dishes(&mut self) -> StoreResult<Vec<Dish>> {
        self.view(|t, s| s.dishes.scan(&t.dishes, |_| true))
    }

    async fn put_dish(&mut self, dish: Dish) -> StoreResult<()> {
        self.staged.dishes.put(dish.id, dish);
        Ok(())
    }

    async fn delete_dish(&mut self, id: Uuid) -> StoreResult<()> {
        self.staged.dishes.remove(id);
        Ok(())
    }

    async fn order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        self.view(|t, s| s.orders.get(&t.orders, &id))
    }

    async fn orders(&mut self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        self.view(|t, s| {
            let mut orders = s.orders.scan(&t.orders, |order| filter.matches(order));
            orders.sort_by_key(|order| order.created_at);
            orders
        })
    }

    async fn put_order(&mut self, order: Order) -> StoreResult<()> {
        self.staged.orders.put(order.id, order);
        Ok(())
    }

    async fn delete_order(&mut self, id: Uuid) -> StoreResult<()> {
        self.staged.orders.remove(id);
        Ok(())
    }

    async fn line_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderLineItem>> {
        self.view(|t, s| s.line_items.scan(&t.line_items, |item| item.order_id == order_id))
    }

    async fn line_items_for_dish(&mut self, dish_id: Uuid) -> StoreResult<Vec<OrderLineItem>> {
        self.view(|t, s| s.line_items.scan(&t.line_items, |item| item.dish_id == dish_id))
    }

    async fn put_line_item(&mut self, item: OrderLineItem) -> StoreResult<()> {
        self.staged.line_items.put((item.order_id, item.dish_id), item);
        Ok(())
    }

    async fn delete_line_items(&mut self, order_id: Uuid) -> StoreResult<()> {
        let items = self.line_items(order_id).await?;
        for item in items {
            self.staged.line_items.remove((item.order_id, item.dish_id));
        }
        Ok(())
    }

    async fn address(&mut self, order_id: Uuid) -> StoreResult<Option<Address>> {
        self.view(|t, s| s.addresses.get(&t.addresses, &order_id))
    }

    async fn put_address(&mut self, address: Address) -> StoreResult<()> {
        self.staged.addresses.put(address.order_id, address);
        Ok(())
    }

    async fn order_details(&mut self, filter: &OrderFilter) -> StoreResult<Vec<OrderDetails>> {
        self.view(|t, s| {
            let mut orders = s.orders.scan(&t.orders, |order| filter.matches(order));
            orders.sort_by_key(|order| order.created_at);
            resolve_details(t, s, orders)
        })
    }

    async fn checker(&mut self, order_id: Uuid) -> StoreResult<Option<DeliveryChecker>> {
        self.view(|t, s| s.checkers.get(&t.checkers, &order_id))
    }

    async fn put_checker(&mut self, checker: DeliveryChecker) -> StoreResult<()> {
        self.staged.checkers.put(checker.order_id, checker);
        Ok(())
    }

    async fn delete_checker(&mut self, order_id: Uuid) -> StoreResult<()> {
        self.staged.checkers.remove(order_id);
        Ok(())
    }

    async fn review(&mut self, id: Uuid) -> StoreResult<Option<Review>> {
        self.view(|t, s| s.reviews.get(&t.reviews, &id))
    }

    async fn reviews(&mut self, filter: &ReviewFilter) -> StoreResult<Vec<Review>> {
        self.view(|t, s| {
            let mut reviews = s.reviews.scan(&t.reviews, |review| filter.matches(review));
            reviews.sort_by_key(|review| review.created_at);
            reviews
        })
    }

    async fn put_review(&mut self, review: Review) -> StoreResult<()> {
        self.staged.reviews.put(review.id, review);
        Ok(())
    }

    async fn has_purchased(&mut self, user_id: Uuid, dish_id: Uuid) -> StoreResult<bool> {
        self.view(|t, s| {
            s.line_items
                .scan(&t.line_items, |item| item.dish_id == dish_id)
                .iter()
                .filter_map(|item| s.orders.get(&t.orders, &item.order_id))
                .any(|order| order.customer_id == user_id && order.status == OrderStatus::Closed)
        })
    }

    async fn revoke_token(&mut self, token: RevokedToken) -> StoreResult<()> {
        self.staged.revoked_tokens.put(token.token.clone(), token);
        Ok(())
    }

    async fn is_revoked(&mut self, token: &str) -> StoreResult<bool> {
        let key = token.to_string();
        self.view(|t, s| s.revoked_tokens.get(&t.revoked_tokens, &key).is_some())
    }

    async fn commit(mut self) -> StoreResult<()> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.shared.tables.write().map_err(poison_err)?;
            staged.check_unique(&tables)?;
            staged.apply(&mut tables);
        }

        // Row locks are released on drop, once the writes are visible.
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        for (key, guard) in self.held.drain() {
            drop(guard);
            // Only the map still points at the mutex: nobody holds or waits on it.
            self.shared
                .row_locks
                .remove_if(&key, |_, row| Arc::strong_count(row) == 1);
        }
    }
}
