// src/handlers/ws_handler.rs
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing;

use crate::errors::DispatchError as AppError;
use crate::handlers::SharedState;
use crate::models::driver::DriverLocationUpdate;
use crate::models::messages::{AcceptOutcome, ChannelMessage, DriverCommand};
use crate::services::channel_registry::{MessageReceiver, ParticipantRole, Subscription};

pub async fn driver_socket(
    ws: WebSocketUpgrade,
    Path(driver_id): Path<String>,
    State(state): State<SharedState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_driver_socket(socket, driver_id, state))
}

pub async fn trip_socket(
    ws: WebSocketUpgrade,
    Path((trip_id, role)): Path<(String, ParticipantRole)>,
    State(state): State<SharedState>,
) -> Result<Response, AppError> {
    if state.trip_service.get_trip(&trip_id).await?.is_none() {
        return Err(AppError::trip_not_found(trip_id));
    }
    Ok(ws.on_upgrade(move |socket| handle_trip_socket(socket, trip_id, role, state)))
}

/// Write everything from `channel` and `replies` to the socket, in arrival order per source.
fn spawn_writer(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut channel: MessageReceiver,
    mut replies: mpsc::UnboundedReceiver<ChannelMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(message) = channel.recv() => message,
                Some(message) = replies.recv() => message,
                else => break,
            };
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Could not encode {}: {}", message.kind(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    })
}

async fn handle_driver_socket(socket: WebSocket, driver_id: String, state: SharedState) {
    let Subscription {
        connection_id,
        receiver,
    } = state.registry.connect_driver(&driver_id).await;
    let (sink, mut stream) = socket.split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(sink, receiver, reply_rx);

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => {
                let command = match serde_json::from_str::<DriverCommand>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        let _ = reply_tx.send(ChannelMessage::Error {
                            message: format!("unrecognised command: {}", e),
                        });
                        continue;
                    }
                };

                // Commands run independently so a slow accept never blocks location updates
                let state = state.clone();
                let driver_id = driver_id.clone();
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    if let Some(reply) = handle_driver_command(&state, &driver_id, command).await {
                        let _ = reply_tx.send(reply);
                    }
                });
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    if state.registry.disconnect_driver(&driver_id, connection_id).await {
        if let Err(e) = state.driver_service.set_driver_offline(&driver_id).await {
            tracing::warn!("Could not mark driver {} offline: {}", driver_id, e);
        }
    }
}

pub(crate) async fn handle_driver_command(
    state: &SharedState,
    driver_id: &str,
    command: DriverCommand,
) -> Option<ChannelMessage> {
    match command {
        DriverCommand::Location { latitude, longitude } => {
            let update = DriverLocationUpdate {
                driver_id: driver_id.to_string(),
                latitude,
                longitude,
            };
            state
                .driver_service
                .update_driver_location(update)
                .await
                .err()
                .map(|e| ChannelMessage::Error { message: e.to_string() })
        }
        DriverCommand::Accept { trip_id } => {
            let outcome = match state.trip_service.assign_driver(&trip_id, driver_id).await {
                Ok(decision) => decision.outcome(),
                Err(e) => {
                    tracing::error!("Accept of trip {} by {} failed: {}", trip_id, driver_id, e);
                    AcceptOutcome::Error
                }
            };
            Some(ChannelMessage::AcceptResult { trip_id, outcome })
        }
        DriverCommand::Deny { trip_id } => state
            .trip_service
            .deny_assignment(&trip_id, driver_id)
            .await
            .err()
            .map(|e| ChannelMessage::Error { message: e.to_string() }),
        DriverCommand::Reject { trip_id } => state
            .trip_service
            .reject_offer(&trip_id, driver_id)
            .await
            .err()
            .map(|e| ChannelMessage::Error { message: e.to_string() }),
        DriverCommand::Ping => {
            tracing::trace!("Ping from driver {}", driver_id);
            None
        }
    }
}

async fn handle_trip_socket(socket: WebSocket, trip_id: String, role: ParticipantRole, state: SharedState) {
    let Subscription {
        connection_id,
        receiver,
    } = state.registry.join_trip_room(&trip_id, role).await;
    let (sink, mut stream) = socket.split();
    let (_reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(sink, receiver, reply_rx);

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<ChannelMessage>(&text) {
                Ok(message) => {
                    if !state.registry.relay(&trip_id, role, &message).await {
                        tracing::debug!("Trip {}: {} has nobody to relay to", trip_id, role);
                    }
                }
                Err(e) => tracing::debug!("Trip {}: dropping malformed frame from {}: {}", trip_id, role, e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.registry.leave_trip_room(&trip_id, role, connection_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::in_memory_state;
    use crate::models::trip::TripStatus;
    use crate::services::messaging_service::NotificationService;

    #[tokio::test]
    async fn test_location_and_ping_commands() {
        let state = in_memory_state();
        let reply = handle_driver_command(
            &state,
            "drv-a",
            DriverCommand::Location { latitude: 10.81, longitude: 106.70 },
        )
        .await;
        assert!(reply.is_none());
        assert!(handle_driver_command(&state, "drv-a", DriverCommand::Ping).await.is_none());

        let reply = handle_driver_command(
            &state,
            "drv-a",
            DriverCommand::Location { latitude: 100.0, longitude: 106.70 },
        )
        .await;
        assert!(matches!(reply, Some(ChannelMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_accept_over_channel() {
        let state = in_memory_state();
        let mut offers = state.registry.connect_driver("drv-a").await;
        handle_driver_command(
            &state,
            "drv-a",
            DriverCommand::Location { latitude: 10.81, longitude: 106.70 },
        )
        .await;

        let created = state
            .trip_service
            .create_trip(crate::models::trip::fixtures::request(
                crate::models::trip::VehicleClass::FourSeater,
            ))
            .await
            .unwrap();
        let trip_id = created.trip.id.clone();
        assert!(matches!(
            offers.receiver.recv().await,
            Some(ChannelMessage::TripOffer { trip_id: ref offered, .. }) if *offered == trip_id
        ));

        let reply = handle_driver_command(&state, "drv-a", DriverCommand::Accept { trip_id: trip_id.clone() }).await;
        assert_eq!(
            reply,
            Some(ChannelMessage::AcceptResult {
                trip_id: trip_id.clone(),
                outcome: AcceptOutcome::Assigned,
            })
        );

        let again = handle_driver_command(&state, "drv-b", DriverCommand::Accept { trip_id: trip_id.clone() }).await;
        assert!(matches!(
            again,
            Some(ChannelMessage::AcceptResult { outcome: AcceptOutcome::NotAvailable, .. })
        ));

        let deny = handle_driver_command(&state, "drv-a", DriverCommand::Deny { trip_id: trip_id.clone() }).await;
        assert!(deny.is_none());
        let trip = state.trip_service.get_trip(&trip_id).await.unwrap().unwrap();
        assert_eq!(trip.status, TripStatus::Pending);
    }

    #[tokio::test]
    async fn test_passenger_room_receives_assignment_push() {
        let state = in_memory_state();
        let mut room = state.registry.join_trip_room("trp-250101-abc12", ParticipantRole::Passenger).await;

        let message = ChannelMessage::DriverUnassigned {
            trip_id: "trp-250101-abc12".to_string(),
        };
        assert!(state.registry.send_to_passenger("trp-250101-abc12", &message).await);
        assert_eq!(room.receiver.recv().await, Some(message));
    }
}
