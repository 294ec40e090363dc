//! Order aggregate and its lifecycle.
//!
//! `Cart -> Cooking -> WaitingForCourier -> OutForDelivery -> Closed`, with
//! `Cooking -> Cancelled` as the staff exit. Each edge is driven by exactly one
//! role; [`OrderStatus::driver`] is the single table of legal edges.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::dish::Dish;
use crate::models::user::Role;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Cart,
    Cooking,
    WaitingForCourier,
    OutForDelivery,
    Closed,
    Cancelled,
}

impl OrderStatus {
    /// Role allowed to move an order from `self` to `next`, or `None` when the
    /// edge does not exist.
    pub fn driver(self, next: OrderStatus) -> Option<Role> {
        use OrderStatus::*;

        match (self, next) {
            (Cart, Cooking) => Some(Role::Customer),
            (Cooking, WaitingForCourier) | (Cooking, Cancelled) => Some(Role::Staff),
            (WaitingForCourier, OutForDelivery) | (OutForDelivery, Closed) => Some(Role::Courier),
            (Cart, _)
            | (Cooking, _)
            | (WaitingForCourier, _)
            | (OutForDelivery, _)
            | (Closed, _)
            | (Cancelled, _) => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Cancelled)
    }

    /// States in which the order carries a live delivery checker.
    pub fn holds_checker(self) -> bool {
        matches!(
            self,
            OrderStatus::Cooking | OrderStatus::WaitingForCourier | OrderStatus::OutForDelivery
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("order cannot move from {from:?} to {to:?}")]
    Illegal { from: OrderStatus, to: OrderStatus },

    #[error("{actor} cannot move an order from {from:?} to {to:?}")]
    WrongRole {
        actor: Role,
        from: OrderStatus,
        to: OrderStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub status: OrderStatus,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cooking_started_at: Option<DateTime<Utc>>,
    pub preparation_secs: Option<i64>,
    pub delivery_started_at: Option<DateTime<Utc>>,
    pub delivery_secs: Option<i64>,
}

impl Order {
    pub fn new_cart(customer_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_id,
            courier_id: None,
            status: OrderStatus::Cart,
            price: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            cooking_started_at: None,
            preparation_secs: None,
            delivery_started_at: None,
            delivery_secs: None,
        }
    }

    /// Applies a status change on behalf of `actor`, recording the
    /// preparation and delivery timings along the way.
    pub fn advance(
        &mut self,
        next: OrderStatus,
        actor: Role,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let from = self.status;
        match from.driver(next) {
            None => return Err(TransitionError::Illegal { from, to: next }),
            Some(driver) if driver != actor => {
                return Err(TransitionError::WrongRole {
                    actor,
                    from,
                    to: next,
                });
            }
            Some(_) => {}
        }

        match next {
            OrderStatus::Cooking => self.cooking_started_at = Some(now),
            OrderStatus::WaitingForCourier | OrderStatus::Cancelled => {
                self.preparation_secs = self
                    .cooking_started_at
                    .map(|start| (now - start).num_seconds());
            }
            OrderStatus::OutForDelivery => self.delivery_started_at = Some(now),
            OrderStatus::Closed => {
                self.delivery_secs = self
                    .delivery_started_at
                    .map(|start| (now - start).num_seconds());
            }
            OrderStatus::Cart => {}
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLineItem {
    pub order_id: Uuid,
    pub dish_id: Uuid,
    pub count: u32,
}

/// Sum of `count * price` over the items whose dish is known, or `None` when
/// the total does not fit in a `Decimal`.
pub fn line_total<'a>(
    items: impl IntoIterator<Item = &'a OrderLineItem>,
    price_of: impl Fn(Uuid) -> Option<Decimal>,
) -> Option<Decimal> {
    items
        .into_iter()
        .filter_map(|item| price_of(item.dish_id).map(|price| (price, item.count)))
        .try_fold(Decimal::ZERO, |total, (price, count)| {
            total.checked_add(price.checked_mul(Decimal::from(count))?)
        })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    #[serde(default)]
    pub order_id: Uuid,
    pub phone: String,
    pub street: String,
    pub house_number: String,
    pub apartment: String,
    pub entry_code: String,
}

impl Address {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("phone", &self.phone),
            ("street", &self.street),
            ("house_number", &self.house_number),
            ("apartment", &self.apartment),
            ("entry_code", &self.entry_code),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// One-time delivery confirmation code bound to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryChecker {
    pub order_id: Uuid,
    pub code: u32,
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemDetails {
    pub dish_id: Uuid,
    pub count: u32,
    pub dish: Option<Dish>,
}

/// An order joined with its resolved line items and delivery address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<LineItemDetails>,
    pub address: Option<Address>,
}

/// Published after every committed status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub courier_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl From<&Order> for OrderEvent {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            customer_id: order.customer_id,
            status: order.status,
            courier_id: order.courier_id,
            at: order.updated_at,
        }
    }
}
