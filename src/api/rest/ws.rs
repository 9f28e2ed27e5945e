use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::future::ready;
use futures::stream::{self, BoxStream};
use futures::SinkExt;
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::models::assignment::Assignment;
use crate::models::order::OrderEvent;
use crate::models::tracking::TrackingSnapshot;
use crate::state::AppState;

/// Everything pushed to dashboard and customer clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    Assignment(Assignment),
    OrderEvent(OrderEvent),
    Tracking(TrackingSnapshot),
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn lagged<T>(item: Result<T, BroadcastStreamRecvError>) -> Option<T> {
    match item {
        Ok(value) => Some(value),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "websocket client lagging; events dropped");
            None
        }
    }
}

fn push_events(state: &AppState) -> BoxStream<'static, PushEvent> {
    let assignments = BroadcastStream::new(state.assignment_events_tx.subscribe())
        .filter_map(|item| ready(lagged(item).map(PushEvent::Assignment)));
    let orders = BroadcastStream::new(state.order_events_tx.subscribe())
        .filter_map(|item| ready(lagged(item).map(PushEvent::OrderEvent)));
    let snapshots = BroadcastStream::new(state.snapshots.subscribe())
        .filter_map(|item| ready(lagged(item).map(PushEvent::Tracking)));

    stream::select_all([assignments.boxed(), orders.boxed(), snapshots.boxed()]).boxed()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = push_events(&state);

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize push event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    first_to_finish(send_task, recv_task).await;
    info!("websocket client disconnected");
}

/// Waits for either half of a connection to end and aborts the other.
async fn first_to_finish(mut left: JoinHandle<()>, mut right: JoinHandle<()>) {
    tokio::select! {
        _ = &mut left => right.abort(),
        _ = &mut right => left.abort(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::{first_to_finish, PushEvent};
    use crate::models::order::{OrderEvent, OrderStatus};

    #[test]
    fn push_events_are_tagged_by_kind() {
        let at = Utc::now();
        let event = PushEvent::OrderEvent(OrderEvent {
            order_id: 4,
            from: OrderStatus::Ready,
            to: OrderStatus::Shipped,
            rider_id: Some(2),
            at,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("order_event"));
        assert_eq!(value["data"]["to"], json!("shipped"));
    }

    #[tokio::test]
    async fn ending_one_half_aborts_the_other() {
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let finished = tokio::spawn(async {});
        let lingering = tokio::spawn(async move {
            let _alive = alive_tx;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        tokio::time::timeout(Duration::from_secs(1), first_to_finish(finished, lingering))
            .await
            .unwrap();

        // The sender is dropped only once the lingering task is torn down.
        let closed = tokio::time::timeout(Duration::from_secs(1), alive_rx).await.unwrap();
        assert!(closed.is_err());
    }
}
