use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub orders_awaiting_rider: IntGauge,
    pub assignment_latency_seconds: HistogramVec,
    pub route_computations_total: IntCounterVec,
    pub tracking_polls_total: IntCounterVec,
    pub otp_verifications_total: IntCounterVec,
    pub location_sync_failures_total: IntCounter,
    pub active_sessions: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new(
                "order_transitions_total",
                "Order state transitions by action and outcome",
            ),
            &["action", "outcome"],
        )
        .expect("valid order_transitions_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Rider assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let orders_awaiting_rider = IntGauge::new(
            "orders_awaiting_rider",
            "Orders queued for rider assignment",
        )
        .expect("valid orders_awaiting_rider metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let route_computations_total = IntCounterVec::new(
            Opts::new("route_computations_total", "Route computations by outcome"),
            &["outcome"],
        )
        .expect("valid route_computations_total metric");

        let tracking_polls_total = IntCounterVec::new(
            Opts::new("tracking_polls_total", "Customer tracking polls by outcome"),
            &["outcome"],
        )
        .expect("valid tracking_polls_total metric");

        let otp_verifications_total = IntCounterVec::new(
            Opts::new("otp_verifications_total", "Delivery code checks by outcome"),
            &["outcome"],
        )
        .expect("valid otp_verifications_total metric");

        let location_sync_failures_total = IntCounter::new(
            "location_sync_failures_total",
            "Rider location sync attempts that failed",
        )
        .expect("valid location_sync_failures_total metric");

        let active_sessions = IntGauge::new("active_sessions", "Riders with a running delivery session")
            .expect("valid active_sessions metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(orders_awaiting_rider.clone()))
            .expect("register orders_awaiting_rider");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(route_computations_total.clone()))
            .expect("register route_computations_total");
        registry
            .register(Box::new(tracking_polls_total.clone()))
            .expect("register tracking_polls_total");
        registry
            .register(Box::new(otp_verifications_total.clone()))
            .expect("register otp_verifications_total");
        registry
            .register(Box::new(location_sync_failures_total.clone()))
            .expect("register location_sync_failures_total");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("register active_sessions");

        Self {
            registry,
            order_transitions_total,
            assignments_total,
            orders_awaiting_rider,
            assignment_latency_seconds,
            route_computations_total,
            tracking_polls_total,
            otp_verifications_total,
            location_sync_failures_total,
            active_sessions,
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

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
