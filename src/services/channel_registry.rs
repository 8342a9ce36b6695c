// src/services/channel_registry.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::{mpsc, RwLock};
use tracing;
use uuid::Uuid;

use crate::models::messages::ChannelMessage;
use crate::services::messaging_service::NotificationService;

pub type MessageReceiver = mpsc::UnboundedReceiver<ChannelMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Driver,
    Passenger,
}

impl ParticipantRole {
    pub fn counterpart(&self) -> Self {
        match self {
            ParticipantRole::Driver => ParticipantRole::Passenger,
            ParticipantRole::Passenger => ParticipantRole::Driver,
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Driver => f.write_str("driver"),
            ParticipantRole::Passenger => f.write_str("passenger"),
        }
    }
}

/// Handle returned on connect; pass `connection_id` back on disconnect.
pub struct Subscription {
    pub connection_id: Uuid,
    pub receiver: MessageReceiver,
}

struct Connection {
    id: Uuid,
    sender: mpsc::UnboundedSender<ChannelMessage>,
}

impl Connection {
    fn open() -> (Self, Subscription) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        (Self { id, sender }, Subscription { connection_id: id, receiver })
    }
}

/// One ordered channel per online driver, plus per-trip rooms.
///
/// A reconnect replaces the previous channel; a disconnect only removes the
/// channel it was issued for, so a late close from an old socket cannot
/// unregister the new one.
#[derive(Default)]
pub struct ChannelRegistry {
    drivers: RwLock<HashMap<String, Connection>>,
    trip_rooms: RwLock<HashMap<String, HashMap<ParticipantRole, Connection>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect_driver(&self, driver_id: &str) -> Subscription {
        let (connection, subscription) = Connection::open();
        if self.drivers.write().await.insert(driver_id.to_string(), connection).is_some() {
            tracing::info!("Driver {} reconnected, replacing previous channel", driver_id);
        } else {
            tracing::info!("Driver {} connected", driver_id);
        }
        subscription
    }

    pub async fn disconnect_driver(&self, driver_id: &str, connection_id: Uuid) -> bool {
        let mut drivers = self.drivers.write().await;
        match drivers.get(driver_id) {
            Some(connection) if connection.id == connection_id => {
                drivers.remove(driver_id);
                tracing::info!("Driver {} disconnected", driver_id);
                true
            }
            _ => false,
        }
    }

    pub async fn is_driver_online(&self, driver_id: &str) -> bool {
        self.drivers.read().await.contains_key(driver_id)
    }

    pub async fn online_drivers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.drivers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn join_trip_room(&self, trip_id: &str, role: ParticipantRole) -> Subscription {
        let (connection, subscription) = Connection::open();
        self.trip_rooms
            .write()
            .await
            .entry(trip_id.to_string())
            .or_default()
            .insert(role, connection);
        tracing::info!("Trip room {}: {} joined", trip_id, role);
        subscription
    }

    pub async fn leave_trip_room(&self, trip_id: &str, role: ParticipantRole, connection_id: Uuid) {
        let mut rooms = self.trip_rooms.write().await;
        let Some(room) = rooms.get_mut(trip_id) else {
            return;
        };
        if room.get(&role).is_some_and(|connection| connection.id == connection_id) {
            room.remove(&role);
            tracing::info!("Trip room {}: {} left", trip_id, role);
        }
        if room.is_empty() {
            rooms.remove(trip_id);
        }
    }

    /// Forward a message from one participant to the other side of the room.
    pub async fn relay(&self, trip_id: &str, from: ParticipantRole, message: &ChannelMessage) -> bool {
        self.send_in_room(trip_id, from.counterpart(), message).await
    }

    pub async fn send_in_room(&self, trip_id: &str, role: ParticipantRole, message: &ChannelMessage) -> bool {
        let stale = {
            let rooms = self.trip_rooms.read().await;
            match rooms.get(trip_id).and_then(|room| room.get(&role)) {
                Some(connection) => match connection.sender.send(message.clone()) {
                    Ok(()) => return true,
                    Err(_) => connection.id,
                },
                None => return false,
            }
        };

        tracing::warn!("Trip room {}: {} channel closed, dropping it", trip_id, role);
        self.leave_trip_room(trip_id, role, stale).await;
        false
    }
}

#[async_trait]
impl NotificationService for ChannelRegistry {
    async fn send_to_driver(&self, driver_id: &str, message: &ChannelMessage) -> bool {
        let stale = {
            let drivers = self.drivers.read().await;
            match drivers.get(driver_id) {
                Some(connection) => match connection.sender.send(message.clone()) {
                    Ok(()) => {
                        tracing::debug!("Queued {} for driver {}", message.kind(), driver_id);
                        return true;
                    }
                    Err(_) => connection.id,
                },
                None => {
                    tracing::debug!("Driver {} is not connected, {} not sent", driver_id, message.kind());
                    return false;
                }
            }
        };

        tracing::warn!("Channel for driver {} is closed, dropping it", driver_id);
        self.disconnect_driver(driver_id, stale).await;
        false
    }

    async fn send_to_passenger(&self, trip_id: &str, message: &ChannelMessage) -> bool {
        self.send_in_room(trip_id, ParticipantRole::Passenger, message).await
    }
}
