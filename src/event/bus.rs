use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::events::RoomEvent;

const ROOM_CHANNEL_CAPACITY: usize = 100;

/// Publish/subscribe fan-out of room-scoped events.
///
/// One broadcast channel per room code. The bus does no room-existence
/// checking itself; the boundary layer validates codes against the registry
/// before subscribing.
#[derive(Debug, Clone)]
pub struct EventBus {
    room_channels: Arc<RwLock<HashMap<String, broadcast::Sender<RoomEvent>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            room_channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publishes an event to all current subscribers of a room code.
    pub async fn publish(&self, code: &str, event: RoomEvent) {
        let room_channels = self.room_channels.read().await;

        if let Some(sender) = room_channels.get(code) {
            match sender.send(event) {
                Ok(receiver_count) => {
                    debug!(
                        room_code = %code,
                        receivers = receiver_count,
                        "Room event published"
                    );
                }
                Err(_) => {
                    debug!(room_code = %code, "Room event published with no receivers");
                }
            }
        } else {
            debug!(room_code = %code, "No channel for room, event dropped");
        }
    }

    /// Subscribes to a room's events, creating the channel on first use.
    pub async fn subscribe(&self, code: &str) -> broadcast::Receiver<RoomEvent> {
        {
            let room_channels = self.room_channels.read().await;
            if let Some(sender) = room_channels.get(code) {
                return sender.subscribe();
            }
        }

        debug!(room_code = %code, "Creating room channel for subscription");
        let mut room_channels = self.room_channels.write().await;
        let sender = room_channels
            .entry(code.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Drops a room's channel once the room is destroyed or reaped. Live
    /// receivers observe channel closure and disconnect.
    pub async fn remove_room(&self, code: &str) {
        let mut room_channels = self.room_channels.write().await;
        if room_channels.remove(code).is_some() {
            debug!(room_code = %code, "Room channel removed");
        }
    }
}
