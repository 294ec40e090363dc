use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::rest::auth::Caller;
use crate::error::AppError;
use crate::models::order::{OrderEvent, OrderStatus};
use crate::models::user::Role;
use crate::state::AppState;
use crate::store::{Store, Transaction};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub order_id: Option<Uuid>,
}

/// Which order events a connected caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedScope {
    Everything,
    Customer(Uuid),
    /// Orders open for claiming, plus the ones assigned to this courier row.
    Courier(Option<Uuid>),
}

impl FeedScope {
    fn admits(&self, event: &OrderEvent) -> bool {
        match *self {
            FeedScope::Everything => true,
            FeedScope::Customer(id) => event.customer_id == id,
            FeedScope::Courier(courier_id) => {
                event.status == OrderStatus::WaitingForCourier
                    || (courier_id.is_some() && event.courier_id == courier_id)
            }
        }
    }
}

async fn scope_for<S: Store>(state: &AppState<S>, caller: &Caller) -> Result<FeedScope, AppError> {
    Ok(match caller.user.role {
        Role::Staff | Role::Admin => FeedScope::Everything,
        Role::Customer => FeedScope::Customer(caller.id()),
        Role::Courier => {
            let mut tx = state.store.begin().await?;
            let courier = tx.courier_by_user(caller.id()).await?;
            FeedScope::Courier(courier.map(|courier| courier.id))
        }
    })
}

pub async fn ws_handler<S: Store>(
    caller: Caller,
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<FeedQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let scope = scope_for(&state, &caller).await?;
    let user_id = caller.id();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, scope, query.order_id)))
}

async fn handle_socket<S: Store>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    user_id: Uuid,
    scope: FeedScope,
    only: Option<Uuid>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.order_events_tx.subscribe();

    info!(user_id = %user_id, order_id = ?only, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !scope.admits(&event) || only.is_some_and(|id| id != event.order_id) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize order event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(user_id = %user_id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn event(status: OrderStatus, customer_id: Uuid, courier_id: Option<Uuid>) -> OrderEvent {
        OrderEvent {
            order_id: Uuid::new_v4(),
            customer_id,
            status,
            courier_id,
            at: Utc::now(),
        }
    }

    #[test]
    fn customers_only_see_their_own_orders() {
        let me = Uuid::new_v4();
        let scope = FeedScope::Customer(me);

        assert!(scope.admits(&event(OrderStatus::Cooking, me, None)));
        assert!(!scope.admits(&event(OrderStatus::Cooking, Uuid::new_v4(), None)));
    }

    #[test]
    fn couriers_see_open_and_assigned_orders() {
        let mine = Uuid::new_v4();
        let scope = FeedScope::Courier(Some(mine));
        let customer = Uuid::new_v4();

        assert!(scope.admits(&event(OrderStatus::WaitingForCourier, customer, None)));
        assert!(scope.admits(&event(OrderStatus::Closed, customer, Some(mine))));
        assert!(!scope.admits(&event(OrderStatus::OutForDelivery, customer, Some(Uuid::new_v4()))));
        assert!(!scope.admits(&event(OrderStatus::Cooking, customer, None)));

        let unregistered = FeedScope::Courier(None);
        assert!(!unregistered.admits(&event(OrderStatus::Cancelled, customer, None)));
    }

    #[test]
    fn staff_see_everything() {
        let any = event(OrderStatus::Cooking, Uuid::new_v4(), None);
        assert!(FeedScope::Everything.admits(&any));
    }
}
