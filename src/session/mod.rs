//! Rider sessions: online flag, delivery queue and the active order.
//!
//! [`RiderSession`] is a plain value so the queue rules can be tested on
//! their own. The free functions below are the only code that writes
//! `AppState::sessions` or rider records; routing and tracking read them.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::engine::state_machine::OrderCommand;
use crate::error::AppError;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::assignment::Assignment;
use crate::models::order::{CancelledBy, Order, OrderStatus};
use crate::otp;
use crate::state::AppState;
use crate::tracking::{location_sync, planner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Waiting for the rider to start a session.
    Pending,
    /// Folded into the running session.
    Queued,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    FromPending,
    FromQueue,
    /// The active order was removed; `next` is the new head, if any.
    Active { next: Option<u64> },
    NotPresent,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiderSession {
    rider_id: u64,
    is_online: bool,
    is_session_active: bool,
    pending: Vec<u64>,
    queue: Vec<u64>,
    active_order: Option<u64>,
}

impl RiderSession {
    pub fn new(rider_id: u64, is_online: bool) -> Self {
        Self {
            rider_id,
            is_online,
            is_session_active: false,
            pending: Vec::new(),
            queue: Vec::new(),
            active_order: None,
        }
    }

    pub fn rider_id(&self) -> u64 {
        self.rider_id
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn is_session_active(&self) -> bool {
        self.is_session_active
    }

    pub fn pending(&self) -> &[u64] {
        &self.pending
    }

    pub fn queue(&self) -> &[u64] {
        &self.queue
    }

    pub fn active_order(&self) -> Option<u64> {
        self.active_order
    }

    pub fn contains(&self, order_id: u64) -> bool {
        self.pending.contains(&order_id) || self.queue.contains(&order_id)
    }

    /// Orders the route planner should visit: the running queue, or the
    /// pending list as a preview before the session starts.
    pub fn route_orders(&self) -> &[u64] {
        if self.is_session_active {
            &self.queue
        } else {
            &self.pending
        }
    }

    pub fn invariant_holds(&self) -> bool {
        self.is_session_active == self.active_order.is_some()
            && self.is_session_active == !self.queue.is_empty()
            && self.active_order == self.queue.first().copied()
    }

    pub fn toggle_online(&mut self) -> Result<bool, AppError> {
        if self.is_online && self.is_session_active {
            return Err(AppError::Precondition(format!(
                "rider {} has an active delivery session; complete or cancel it before going offline",
                self.rider_id
            )));
        }
        self.is_online = !self.is_online;
        Ok(self.is_online)
    }

    pub fn enqueue(&mut self, order_id: u64) -> Placement {
        if self.contains(order_id) {
            return Placement::AlreadyPresent;
        }
        if self.is_session_active {
            self.queue.push(order_id);
            Placement::Queued
        } else {
            self.pending.push(order_id);
            Placement::Pending
        }
    }

    /// Returns the active order. Starting an already running session is a no-op.
    pub fn start(&mut self) -> Result<u64, AppError> {
        if let Some(active) = self.active_order {
            return Ok(active);
        }
        if !self.is_online {
            return Err(AppError::Precondition(format!(
                "rider {} must be online to start a session",
                self.rider_id
            )));
        }
        if self.pending.is_empty() {
            return Err(AppError::Precondition(format!(
                "rider {} has no assigned orders to deliver",
                self.rider_id
            )));
        }

        self.queue.append(&mut self.pending);
        self.active_order = self.queue.first().copied();
        self.is_session_active = true;
        Ok(self.queue[0])
    }

    /// Removes an order wherever it sits, keeping the session fields in step.
    pub fn remove(&mut self, order_id: u64) -> Removal {
        if let Some(index) = self.pending.iter().position(|id| *id == order_id) {
            self.pending.remove(index);
            return Removal::FromPending;
        }

        let Some(index) = self.queue.iter().position(|id| *id == order_id) else {
            return Removal::NotPresent;
        };
        self.queue.remove(index);

        if index > 0 {
            return Removal::FromQueue;
        }

        self.active_order = self.queue.first().copied();
        self.is_session_active = self.active_order.is_some();
        Removal::Active {
            next: self.active_order,
        }
    }
}

fn session_entry(state: &AppState, rider_id: u64) -> Result<RiderSession, AppError> {
    if let Some(session) = state.sessions.get(&rider_id) {
        return Ok(session.clone());
    }
    let rider = state
        .riders
        .get(&rider_id)
        .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;
    Ok(RiderSession::new(rider_id, rider.is_available))
}

/// Runs `update` against the rider's session, creating it on first use.
fn with_session<T>(
    state: &AppState,
    rider_id: u64,
    update: impl FnOnce(&mut RiderSession) -> Result<T, AppError>,
) -> Result<(T, RiderSession), AppError> {
    let initial = session_entry(state, rider_id)?;
    let mut entry = state.sessions.entry(rider_id).or_insert(initial);
    let was_active = entry.is_session_active();

    let result = update(entry.value_mut())?;
    debug_assert!(entry.invariant_holds());

    match (was_active, entry.is_session_active()) {
        (false, true) => state.metrics.active_sessions.inc(),
        (true, false) => state.metrics.active_sessions.dec(),
        _ => {}
    }

    Ok((result, entry.clone()))
}

pub fn snapshot(state: &AppState, rider_id: u64) -> Result<RiderSession, AppError> {
    session_entry(state, rider_id)
}

pub fn toggle_online(state: &AppState, rider_id: u64) -> Result<RiderSession, AppError> {
    let (online, session) = with_session(state, rider_id, RiderSession::toggle_online)?;

    if let Some(mut rider) = state.riders.get_mut(&rider_id) {
        rider.is_available = online;
        rider.updated_at = Utc::now();
    }
    if !online {
        location_sync::stop_for_rider(state, rider_id);
    }

    info!(rider_id, online, "rider availability changed");
    Ok(session)
}

/// Binds an order to a rider and places it in the rider's session.
pub async fn assign_order(
    state: &Arc<AppState>,
    rider_id: u64,
    order_id: u64,
) -> Result<Assignment, AppError> {
    let rider = state
        .riders
        .get(&rider_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;

    if !rider.is_verified {
        return Err(AppError::Precondition(format!(
            "rider {rider_id} is not verified"
        )));
    }

    let active_orders = state.active_order_count(rider_id);

    let order = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status.is_terminal() {
            return Err(AppError::Precondition(format!(
                "order {order_id} is already {}",
                order.status
            )));
        }
        if order.shop_id != rider.shop_id {
            return Err(AppError::Precondition(format!(
                "rider {rider_id} does not deliver for shop {}",
                order.shop_id
            )));
        }
        match order.assigned_rider_id {
            Some(existing) if existing != rider_id => {
                return Err(AppError::Conflict(format!(
                    "order {order_id} is already assigned to rider {existing}"
                )));
            }
            Some(_) => {}
            None => {
                order.assigned_rider_id = Some(rider_id);
                order.updated_at = Utc::now();
            }
        }
        order.clone()
    };

    let (placement, _) = with_session(state, rider_id, |session| Ok(session.enqueue(order_id)))?;

    let distance_km = state
        .shops
        .get(&order.shop_id)
        .and_then(|shop| shop.location.point())
        .zip(rider.location)
        .map(|(shop_point, rider_point)| haversine_km(&rider_point, &shop_point));

    let assignment = Assignment {
        id: Uuid::new_v4(),
        order_id,
        rider_id,
        active_orders,
        rating: rider.rating,
        distance_km,
        assigned_at: Utc::now(),
    };

    if placement != Placement::AlreadyPresent {
        state.assignments.insert(assignment.id, assignment.clone());
        let _ = state.assignment_events_tx.send(assignment.clone());
        info!(order_id, rider_id, ?placement, "order assigned to rider");
    }

    if placement == Placement::Queued {
        planner::schedule_refresh(state, rider_id);
    }

    if order.ready_requested && order.status == OrderStatus::Preparing {
        if let Err(err) = lifecycle::transition(state, order_id, OrderCommand::MarkReady).await {
            warn!(order_id, error = %err, "deferred ready transition failed");
        }
    }

    Ok(assignment)
}

pub fn start_session(state: &Arc<AppState>, rider_id: u64) -> Result<RiderSession, AppError> {
    let (active, session) = with_session(state, rider_id, RiderSession::start)?;

    info!(rider_id, active_order = active, queued = session.queue().len(), "delivery session started");
    planner::schedule_refresh(state, rider_id);

    Ok(session)
}

pub async fn mark_picked_up(
    state: &Arc<AppState>,
    rider_id: u64,
    order_id: u64,
) -> Result<Order, AppError> {
    let active_order = session_entry(state, rider_id)?.active_order();
    let (order, _) = lifecycle::transition(
        state,
        order_id,
        OrderCommand::PickUp {
            rider_id,
            active_order,
        },
    )
    .await?;
    Ok(order)
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub order: Order,
    pub session: RiderSession,
}

/// Clears the in-flight marker however the completion ends.
struct InFlight<'a> {
    state: &'a AppState,
    order_id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.completions_in_flight.remove(&self.order_id);
    }
}

/// Verifies the doorstep code for the active order, marks it delivered and
/// advances the queue.
pub async fn complete_current_order(
    state: &Arc<AppState>,
    rider_id: u64,
    code: &str,
) -> Result<Completion, AppError> {
    otp::validate_code(code)?;

    let order_id = session_entry(state, rider_id)?.active_order().ok_or_else(|| {
        AppError::Precondition(format!("rider {rider_id} has no active delivery"))
    })?;

    if !state.completions_in_flight.insert(order_id) {
        return Err(AppError::Conflict(format!(
            "completion of order {order_id} is already in progress"
        )));
    }
    let _in_flight = InFlight {
        state: state.as_ref(),
        order_id,
    };

    let status = state
        .orders
        .get(&order_id)
        .map(|order| order.status)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    if status != OrderStatus::Shipped {
        return Err(AppError::Precondition(format!(
            "order {order_id} must be picked up before completion; it is {status}"
        )));
    }

    let verification = otp::verify_delivery(
        state.otp.as_ref(),
        order_id,
        code,
        state.config.external_call_timeout,
    )
    .await;

    let outcome = match &verification {
        Ok(_) => "verified",
        Err(AppError::OtpMismatch) => "mismatch",
        Err(_) => "error",
    };
    state
        .metrics
        .otp_verifications_total
        .with_label_values(&[outcome])
        .inc();

    let proof = verification.inspect_err(|err| {
        warn!(order_id, rider_id, error = %err, "delivery code rejected");
    })?;

    let (order, _) = lifecycle::transition(state, order_id, OrderCommand::Deliver { proof }).await?;
    let (_, session) = with_session(state, rider_id, |session| Ok(session.remove(order_id)))?;

    if let Some(mut rider) = state.riders.get_mut(&rider_id) {
        rider.total_deliveries = rider.total_deliveries.saturating_add(1);
        rider.updated_at = Utc::now();
    }

    info!(
        order_id,
        rider_id,
        next_order = ?session.active_order(),
        "delivery completed"
    );
    planner::schedule_refresh(state, rider_id);

    Ok(Completion { order, session })
}

/// Rider-initiated cancellation of one of their orders.
pub async fn cancel_order(
    state: &Arc<AppState>,
    rider_id: u64,
    order_id: u64,
    reason: &str,
) -> Result<Order, AppError> {
    if reason.trim().is_empty() {
        return Err(AppError::BadRequest("a cancel reason is required".to_string()));
    }

    let assigned = state
        .orders
        .get(&order_id)
        .map(|order| order.assigned_rider_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    if assigned != Some(rider_id) {
        return Err(AppError::Precondition(format!(
            "order {order_id} is not assigned to rider {rider_id}"
        )));
    }

    let (order, _) = lifecycle::transition(
        state,
        order_id,
        OrderCommand::Cancel {
            by: CancelledBy::Rider,
            reason: reason.to_string(),
        },
    )
    .await?;
    Ok(order)
}

/// Drops a cancelled order from whichever session holds it.
pub(crate) fn detach_order(state: &Arc<AppState>, rider_id: u64, order_id: u64) {
    let removal = with_session(state, rider_id, |session| Ok(session.remove(order_id)));
    match removal {
        Ok((Removal::NotPresent, _)) => {}
        Ok((removal, session)) => {
            info!(order_id, rider_id, ?removal, next_order = ?session.active_order(), "order removed from rider session");
            planner::schedule_refresh(state, rider_id);
        }
        Err(err) => warn!(order_id, rider_id, error = %err, "failed to detach order from session"),
    }
}

/// Stores a position sample from the rider's device. Offline riders are
/// not tracked.
pub fn record_location(state: &Arc<AppState>, rider_id: u64, point: GeoPoint) -> Result<(), AppError> {
    let point = GeoPoint::new(point.lat, point.lng)?;
    {
        let mut rider = state
            .riders
            .get_mut(&rider_id)
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;
        if !rider.is_available {
            return Err(AppError::Precondition(format!(
                "rider {rider_id} is offline; location is not recorded"
            )));
        }
        let now = Utc::now();
        rider.location = Some(point);
        rider.location_updated_at = Some(now);
        rider.updated_at = now;
    }

    planner::schedule_refresh(state, rider_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Placement, Removal, RiderSession};

    fn online_session() -> RiderSession {
        RiderSession::new(1, true)
    }

    #[test]
    fn start_requires_assigned_orders() {
        let mut session = online_session();
        assert!(session.start().is_err());
        assert!(!session.is_session_active());
        assert!(session.invariant_holds());
    }

    #[test]
    fn start_requires_online() {
        let mut session = RiderSession::new(1, false);
        session.enqueue(10);
        assert!(session.start().is_err());
        assert!(session.invariant_holds());
    }

    #[test]
    fn start_moves_pending_orders_into_queue() {
        let mut session = online_session();
        for id in [10, 11, 12] {
            assert_eq!(session.enqueue(id), Placement::Pending);
        }

        assert_eq!(session.start().unwrap(), 10);
        assert_eq!(session.active_order(), Some(10));
        assert_eq!(session.queue(), &[10, 11, 12]);
        assert!(session.pending().is_empty());
        assert!(session.invariant_holds());
    }

    #[test]
    fn orders_assigned_mid_session_join_the_queue() {
        let mut session = online_session();
        session.enqueue(10);
        session.start().unwrap();

        assert_eq!(session.enqueue(11), Placement::Queued);
        assert_eq!(session.enqueue(11), Placement::AlreadyPresent);
        assert_eq!(session.queue(), &[10, 11]);
        assert_eq!(session.active_order(), Some(10));
    }

    #[test]
    fn removing_the_active_order_advances_then_ends_the_session() {
        let mut session = online_session();
        session.enqueue(10);
        session.enqueue(11);
        session.start().unwrap();

        assert_eq!(session.remove(10), Removal::Active { next: Some(11) });
        assert!(session.invariant_holds());
        assert_eq!(session.remove(11), Removal::Active { next: None });
        assert!(!session.is_session_active());
        assert_eq!(session.active_order(), None);
        assert!(session.invariant_holds());
    }

    #[test]
    fn removing_a_queued_order_keeps_the_active_one() {
        let mut session = online_session();
        for id in [10, 11, 12] {
            session.enqueue(id);
        }
        session.start().unwrap();

        assert_eq!(session.remove(11), Removal::FromQueue);
        assert_eq!(session.active_order(), Some(10));
        assert_eq!(session.queue(), &[10, 12]);
        assert_eq!(session.remove(99), Removal::NotPresent);
        assert!(session.invariant_holds());
    }

    #[test]
    fn cannot_go_offline_mid_session() {
        let mut session = online_session();
        session.enqueue(10);
        session.start().unwrap();

        assert!(session.toggle_online().is_err());
        assert!(session.is_online());

        session.remove(10);
        assert_eq!(session.toggle_online().unwrap(), false);
    }

    #[test]
    fn invariant_holds_through_a_mixed_sequence() {
        let mut session = online_session();
        let steps: Vec<Box<dyn Fn(&mut RiderSession)>> = vec![
            Box::new(|s| {
                s.enqueue(1);
            }),
            Box::new(|s| {
                s.enqueue(2);
            }),
            Box::new(|s| {
                let _ = s.start();
            }),
            Box::new(|s| {
                s.enqueue(3);
            }),
            Box::new(|s| {
                s.remove(2);
            }),
            Box::new(|s| {
                let _ = s.toggle_online();
            }),
            Box::new(|s| {
                s.remove(1);
            }),
            Box::new(|s| {
                s.remove(3);
            }),
            Box::new(|s| {
                s.enqueue(4);
            }),
            Box::new(|s| {
                s.remove(4);
            }),
        ];

        for step in steps {
            step(&mut session);
            assert!(session.invariant_holds());
        }
    }
}
