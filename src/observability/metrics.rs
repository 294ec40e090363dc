use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub claims_total: IntCounterVec,
    pub claim_latency_seconds: HistogramVec,
    pub order_transitions_total: IntCounterVec,
    pub delivery_code_rejections_total: IntCounter,
    pub catalog_cache_requests_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Courier claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let claim_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "claim_latency_seconds",
                "Latency of courier claims in seconds, including lock waits",
            ),
            &["outcome"],
        )
        .expect("valid claim_latency_seconds metric");

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order status changes"),
            &["status"],
        )
        .expect("valid order_transitions_total metric");

        let delivery_code_rejections_total = IntCounter::new(
            "delivery_code_rejections_total",
            "Delivery confirmations rejected for a wrong or locked code",
        )
        .expect("valid delivery_code_rejections_total metric");

        let catalog_cache_requests_total = IntCounterVec::new(
            Opts::new("catalog_cache_requests_total", "Catalog cache lookups"),
            &["result"],
        )
        .expect("valid catalog_cache_requests_total metric");

        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(claim_latency_seconds.clone()))
            .expect("register claim_latency_seconds");
        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(delivery_code_rejections_total.clone()))
            .expect("register delivery_code_rejections_total");
        registry
            .register(Box::new(catalog_cache_requests_total.clone()))
            .expect("register catalog_cache_requests_total");

        Self {
            registry,
            claims_total,
            claim_latency_seconds,
            order_transitions_total,
            delivery_code_rejections_total,
            catalog_cache_requests_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
