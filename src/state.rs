use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::models::dish::Dish;
use crate::models::order::OrderEvent;
use crate::observability::metrics::Metrics;
use crate::store::Store;

/// Everything a core operation needs, passed explicitly to every call.
pub struct AppState<S: Store> {
    pub store: S,
    pub config: Config,
    pub dish_list_cache: TtlCache<Arc<Vec<Dish>>>,
    pub dish_cache: TtlCache<Dish>,
    pub order_events_tx: broadcast::Sender<OrderEvent>,
    pub metrics: Metrics,
}

impl<S: Store> AppState<S> {
    pub fn new(store: S, config: Config) -> Self {
        let (order_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));

        Self {
            store,
            dish_list_cache: TtlCache::new(config.catalog_cache_ttl),
            dish_cache: TtlCache::new(config.catalog_cache_ttl),
            order_events_tx,
            metrics: Metrics::new(),
            config,
        }
    }

    /// Notifies subscribers of a committed change. Having no subscribers is
    /// not an error.
    pub fn publish(&self, event: OrderEvent) {
        self.metrics
            .order_transitions_total
            .with_label_values(&[&format!("{:?}", event.status)])
            .inc();
        let _ = self.order_events_tx.send(event);
    }
}
