use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dish {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub image_url: String,
    pub ingredients: String,
    pub restaurant_id: Uuid,
}

impl Dish {
    pub fn new(name: impl Into<String>, price: Decimal, restaurant_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            price,
            image_url: String::new(),
            ingredients: String::new(),
            restaurant_id,
        }
    }

    pub fn is_orderable(&self) -> bool {
        self.price > Decimal::ZERO
    }
}
