use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::config::Config;
use crate::models::address::Address;
use crate::models::assignment::Assignment;
use crate::models::order::{Order, OrderEvent};
use crate::models::rider::Rider;
use crate::models::shop::Shop;
use crate::observability::metrics::Metrics;
use crate::otp::{HttpOtpVerifier, InMemoryOtpVerifier, OtpVerifier};
use crate::session::RiderSession;
use crate::tracking::location_sync::RegisteredSync;
use crate::tracking::planner::CachedRoute;
use crate::tracking::poller::TrackingHandle;
use crate::tracking::routing::{OsrmRoutingProvider, RoutingProvider, StraightLineRoutingProvider};
use crate::tracking::snapshots::SnapshotBoard;

pub struct AppState {
    pub config: Config,
    pub shops: DashMap<u64, Shop>,
    pub addresses: DashMap<u64, Address>,
    pub orders: DashMap<u64, Order>,
    pub riders: DashMap<u64, Rider>,
    /// Owned by `crate::session`; other modules only read it.
    pub sessions: DashMap<u64, RiderSession>,
    pub assignments: DashMap<Uuid, Assignment>,
    pub routes: DashMap<u64, CachedRoute>,
    pub snapshots: SnapshotBoard,
    pub trackers: DashMap<u64, TrackingHandle>,
    pub location_syncs: DashMap<u64, RegisteredSync>,
    pub completions_in_flight: DashSet<u64>,
    pub routing: Arc<dyn RoutingProvider>,
    pub otp: Arc<dyn OtpVerifier>,
    pub assignment_tx: mpsc::Sender<u64>,
    pub assignment_events_tx: broadcast::Sender<Assignment>,
    pub order_events_tx: broadcast::Sender<OrderEvent>,
    pub metrics: Metrics,
    next_id: AtomicU64,
}

impl AppState {
    pub fn new(
        config: Config,
        routing: Arc<dyn RoutingProvider>,
        otp: Arc<dyn OtpVerifier>,
    ) -> (Self, mpsc::Receiver<u64>) {
        let (assignment_tx, assignment_rx) = mpsc::channel(config.order_queue_size);
        let (assignment_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let (order_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let snapshots = SnapshotBoard::new(config.event_buffer_size);

        (
            Self {
                config,
                shops: DashMap::new(),
                addresses: DashMap::new(),
                orders: DashMap::new(),
                riders: DashMap::new(),
                sessions: DashMap::new(),
                assignments: DashMap::new(),
                routes: DashMap::new(),
                snapshots,
                trackers: DashMap::new(),
                location_syncs: DashMap::new(),
                completions_in_flight: DashSet::new(),
                routing,
                otp,
                assignment_tx,
                assignment_events_tx,
                order_events_tx,
                metrics: Metrics::new(),
                next_id: AtomicU64::new(1),
            },
            assignment_rx,
        )
    }

    /// Picks collaborators from the configuration: OSRM when `ROUTING_URL`
    /// is set, straight-line estimates otherwise; remote OTP checks when
    /// `OTP_VERIFY_URL` is set, in-process codes otherwise.
    pub fn from_config(config: Config) -> Result<(Self, mpsc::Receiver<u64>), crate::error::AppError> {
        let routing: Arc<dyn RoutingProvider> = match &config.routing_url {
            Some(url) => Arc::new(OsrmRoutingProvider::new(url.clone())?),
            None => Arc::new(StraightLineRoutingProvider::new(config.average_speed_kmh)),
        };
        let otp: Arc<dyn OtpVerifier> = match &config.otp_verify_url {
            Some(url) => Arc::new(HttpOtpVerifier::new(url.clone())?),
            None => Arc::new(InMemoryOtpVerifier::default()),
        };

        Ok(Self::new(config, routing, otp))
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Non-terminal orders currently assigned to the rider.
    pub fn active_order_count(&self, rider_id: u64) -> usize {
        self.orders
            .iter()
            .filter(|entry| {
                let order = entry.value();
                order.assigned_rider_id == Some(rider_id) && !order.status.is_terminal()
            })
            .count()
    }
}
