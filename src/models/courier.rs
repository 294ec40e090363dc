use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CourierStatus {
    Unactive,
    Waiting,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rating: f64,
    pub vehicle: String,
    pub completed_orders: u32,
    pub status: CourierStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    /// Fresh courier row for a user promoted to the courier role.
    pub fn for_user(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            rating: 0.0,
            vehicle: "NONE".to_string(),
            completed_orders: 0,
            status: CourierStatus::Unactive,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_claim(&self) -> bool {
        self.status == CourierStatus::Waiting
    }
}
