//! Pure order lifecycle rules.
//!
//! `apply` either moves the order to the command's target state, reports
//! that the order is already there, or rejects with a reason. A rejected
//! command never touches the order.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::AppError;
use crate::models::order::{CancelledBy, Order, OrderStatus};
use crate::otp::DeliveryProof;

#[derive(Debug, Clone)]
pub enum OrderCommand {
    Confirm,
    Accept,
    Reject { reason: Option<String> },
    MarkReady,
    /// `active_order` is the rider's current session head, if any.
    PickUp { rider_id: u64, active_order: Option<u64> },
    Deliver { proof: DeliveryProof },
    Cancel { by: CancelledBy, reason: String },
}

impl OrderCommand {
    pub fn action(&self) -> &'static str {
        match self {
            OrderCommand::Confirm => "confirm",
            OrderCommand::Accept => "accept",
            OrderCommand::Reject { .. } => "reject",
            OrderCommand::MarkReady => "mark ready",
            OrderCommand::PickUp { .. } => "pick up",
            OrderCommand::Deliver { .. } => "deliver",
            OrderCommand::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied { from: OrderStatus, to: OrderStatus },
    /// Already in the target state; nothing was written.
    Unchanged,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("cannot {action} order {order_id} while it is {from}")]
    NotAllowed {
        order_id: u64,
        from: OrderStatus,
        action: &'static str,
    },

    #[error("no rider assigned to order {order_id}")]
    NoRiderAssigned { order_id: u64 },

    #[error("order {order_id} is assigned to {assigned:?}, not rider {rider_id}")]
    WrongRider {
        order_id: u64,
        rider_id: u64,
        assigned: Option<u64>,
    },

    #[error("order {order_id} is not rider {rider_id}'s active order")]
    NotActiveOrder { order_id: u64, rider_id: u64 },

    #[error("delivery proof was issued for order {proof_order}, not {order_id}")]
    ProofMismatch { order_id: u64, proof_order: u64 },

    #[error("a cancel reason is required")]
    MissingReason,
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::Precondition(err.to_string())
    }
}

pub fn apply(
    order: &mut Order,
    command: &OrderCommand,
    now: DateTime<Utc>,
) -> Result<Outcome, TransitionError> {
    use OrderStatus::*;

    let from = order.status;
    let order_id = order.id;

    let to = match (from, command) {
        (Pending, OrderCommand::Confirm) => Confirmed,
        (Confirmed, OrderCommand::Confirm) => return Ok(Outcome::Unchanged),

        (Pending | Confirmed, OrderCommand::Accept) => Preparing,
        (Preparing, OrderCommand::Accept) => return Ok(Outcome::Unchanged),

        (Pending | Confirmed, OrderCommand::Reject { reason }) => {
            let reason = reason
                .as_deref()
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .unwrap_or("rejected by shop")
                .to_string();
            order.cancel_by = Some(CancelledBy::Shop);
            order.cancel_reason = Some(reason);
            Cancelled
        }
        (Cancelled, OrderCommand::Reject { .. }) if order.cancel_by == Some(CancelledBy::Shop) => {
            return Ok(Outcome::Unchanged);
        }

        (Preparing, OrderCommand::MarkReady) => {
            if order.assigned_rider_id.is_none() {
                return Err(TransitionError::NoRiderAssigned { order_id });
            }
            Ready
        }
        (Ready, OrderCommand::MarkReady) => return Ok(Outcome::Unchanged),

        (Ready, OrderCommand::PickUp { rider_id, active_order }) => {
            if order.assigned_rider_id != Some(*rider_id) {
                return Err(TransitionError::WrongRider {
                    order_id: order.id,
                    rider_id: *rider_id,
                    assigned: order.assigned_rider_id,
                });
            }
            if *active_order != Some(order.id) {
                return Err(TransitionError::NotActiveOrder {
                    order_id: order.id,
                    rider_id: *rider_id,
                });
            }
            Shipped
        }
        (Shipped, OrderCommand::PickUp { rider_id, .. })
            if order.assigned_rider_id == Some(*rider_id) =>
        {
            return Ok(Outcome::Unchanged);
        }

        (Shipped, OrderCommand::Deliver { proof }) => {
            if proof.order_id() != order.id {
                return Err(TransitionError::ProofMismatch {
                    order_id: order.id,
                    proof_order: proof.order_id(),
                });
            }
            Delivered
        }
        (Delivered, OrderCommand::Deliver { proof }) if proof.order_id() == order.id => {
            return Ok(Outcome::Unchanged);
        }

        (Cancelled, OrderCommand::Cancel { .. }) => return Ok(Outcome::Unchanged),
        (status, OrderCommand::Cancel { by, reason }) if !status.is_terminal() => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(TransitionError::MissingReason);
            }
            order.cancel_by = Some(*by);
            order.cancel_reason = Some(reason.to_string());
            Cancelled
        }

        _ => {
            return Err(TransitionError::NotAllowed {
                order_id,
                from,
                action: command.action(),
            });
        }
    };

    order.status = to;
    order.updated_at = now;
    if to == Ready {
        order.ready_requested = false;
    }

    Ok(Outcome::Applied { from, to })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{apply, OrderCommand, Outcome, TransitionError};
    use crate::models::order::{CancelledBy, Order, OrderStatus, PaymentMethod};
    use crate::otp::DeliveryProof;

    fn order(status: OrderStatus, rider: Option<u64>) -> Order {
        Order {
            id: 42,
            shop_id: 1,
            customer_address_id: 2,
            status,
            total_amount: 310.0,
            total_products: 4,
            assigned_rider_id: rider,
            payment_method: PaymentMethod::CashOnDelivery,
            cancel_by: None,
            cancel_reason: None,
            ready_requested: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn commands() -> Vec<OrderCommand> {
        vec![
            OrderCommand::Confirm,
            OrderCommand::Accept,
            OrderCommand::Reject { reason: None },
            OrderCommand::MarkReady,
            OrderCommand::PickUp { rider_id: 9, active_order: Some(42) },
            OrderCommand::Deliver { proof: DeliveryProof::for_order(42) },
            OrderCommand::Cancel { by: CancelledBy::Customer, reason: "changed mind".to_string() },
        ]
    }

    /// (from, action) pairs that move the order forward.
    fn is_listed(from: OrderStatus, action: &str) -> bool {
        use OrderStatus::*;
        matches!(
            (from, action),
            (Pending, "confirm")
                | (Pending | Confirmed, "accept")
                | (Pending | Confirmed, "reject")
                | (Preparing, "mark ready")
                | (Ready, "pick up")
                | (Shipped, "deliver")
                | (Pending | Confirmed | Preparing | Ready | Shipped, "cancel")
        )
    }

    #[test]
    fn listed_transitions_apply_and_everything_else_is_rejected_or_noop() {
        for from in OrderStatus::ALL {
            for command in commands() {
                let mut subject = order(from, Some(9));
                let before = subject.clone();

                let result = apply(&mut subject, &command, Utc::now());

                if is_listed(from, command.action()) {
                    assert!(
                        matches!(result, Ok(Outcome::Applied { .. })),
                        "{from} + {} should apply, got {result:?}",
                        command.action()
                    );
                } else {
                    match result {
                        Ok(Outcome::Unchanged) | Err(_) => {
                            assert_eq!(subject.status, before.status);
                            assert_eq!(subject.cancel_reason, before.cancel_reason);
                            assert_eq!(subject.updated_at, before.updated_at);
                        }
                        Ok(other) => panic!("{from} + {} unexpectedly {other:?}", command.action()),
                    }
                }
            }
        }
    }

    #[test]
    fn unchanged_only_when_already_in_target_state() {
        use OrderStatus::*;

        let expected_noops = [
            (Confirmed, "confirm"),
            (Preparing, "accept"),
            (Ready, "mark ready"),
            (Shipped, "pick up"),
            (Delivered, "deliver"),
            (Cancelled, "cancel"),
        ];

        for (from, action) in expected_noops {
            let command = commands()
                .into_iter()
                .find(|command| command.action() == action)
                .unwrap();
            let mut subject = order(from, Some(9));
            assert_eq!(
                apply(&mut subject, &command, Utc::now()),
                Ok(Outcome::Unchanged),
                "{from} + {action}"
            );
        }
    }

    #[test]
    fn repeating_a_transition_is_a_noop() {
        let mut subject = order(OrderStatus::Pending, None);
        let first = apply(&mut subject, &OrderCommand::Accept, Utc::now()).unwrap();
        let stamp = subject.updated_at;
        let second = apply(&mut subject, &OrderCommand::Accept, Utc::now()).unwrap();

        assert_eq!(
            first,
            Outcome::Applied { from: OrderStatus::Pending, to: OrderStatus::Preparing }
        );
        assert_eq!(second, Outcome::Unchanged);
        assert_eq!(subject.status, OrderStatus::Preparing);
        assert_eq!(subject.updated_at, stamp);
    }

    #[test]
    fn ready_without_rider_is_rejected() {
        let mut subject = order(OrderStatus::Preparing, None);
        let result = apply(&mut subject, &OrderCommand::MarkReady, Utc::now());

        assert_eq!(result, Err(TransitionError::NoRiderAssigned { order_id: 42 }));
        assert_eq!(subject.status, OrderStatus::Preparing);
    }

    #[test]
    fn pickup_requires_the_order_to_be_active_for_that_rider() {
        let mut subject = order(OrderStatus::Ready, Some(9));

        let wrong_rider = OrderCommand::PickUp { rider_id: 3, active_order: Some(42) };
        assert!(matches!(
            apply(&mut subject, &wrong_rider, Utc::now()),
            Err(TransitionError::WrongRider { .. })
        ));

        let not_active = OrderCommand::PickUp { rider_id: 9, active_order: Some(7) };
        assert!(matches!(
            apply(&mut subject, &not_active, Utc::now()),
            Err(TransitionError::NotActiveOrder { .. })
        ));
        assert_eq!(subject.status, OrderStatus::Ready);
    }

    #[test]
    fn delivery_proof_must_match_the_order() {
        let mut subject = order(OrderStatus::Shipped, Some(9));
        let command = OrderCommand::Deliver { proof: DeliveryProof::for_order(41) };

        assert!(matches!(
            apply(&mut subject, &command, Utc::now()),
            Err(TransitionError::ProofMismatch { .. })
        ));
        assert_eq!(subject.status, OrderStatus::Shipped);
    }

    #[test]
    fn cancel_requires_reason_and_records_who() {
        let mut subject = order(OrderStatus::Ready, Some(9));
        let blank = OrderCommand::Cancel { by: CancelledBy::Rider, reason: "  ".to_string() };
        assert_eq!(
            apply(&mut subject, &blank, Utc::now()),
            Err(TransitionError::MissingReason)
        );
        assert_eq!(subject.status, OrderStatus::Ready);

        let cancel = OrderCommand::Cancel {
            by: CancelledBy::Rider,
            reason: "customer unreachable".to_string(),
        };
        apply(&mut subject, &cancel, Utc::now()).unwrap();
        assert_eq!(subject.status, OrderStatus::Cancelled);
        assert_eq!(subject.cancel_by, Some(CancelledBy::Rider));
        assert_eq!(subject.cancel_reason.as_deref(), Some("customer unreachable"));
    }

    #[test]
    fn shop_rejection_sets_cancel_by_shop() {
        let mut subject = order(OrderStatus::Pending, None);
        apply(&mut subject, &OrderCommand::Reject { reason: None }, Utc::now()).unwrap();

        assert_eq!(subject.status, OrderStatus::Cancelled);
        assert_eq!(subject.cancel_by, Some(CancelledBy::Shop));
        assert_eq!(subject.cancel_reason.as_deref(), Some("rejected by shop"));
    }
}
