//! Broadcast fan-out for room events.
//!
//! One broadcast channel per room, created on first subscription. Snapshots
//! are sealed before they leave this layer; ordering is only guaranteed with
//! respect to the order the pipeline processed intents for that room.
//! Delivery is fire-and-forget per connection.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::crypto::{CipherError, PayloadCipher};
use super::enrich::RoomView;
use super::protocol::ServerEvent;
use super::state::RoomId;

/// Channel capacity per room. Slow receivers that fall further behind than
/// this lose the oldest events.
const CHANNEL_CAPACITY: usize = 256;

pub struct Broadcaster {
    channels: DashMap<RoomId, broadcast::Sender<ServerEvent>>,
    cipher: PayloadCipher,
}

impl Broadcaster {
    pub fn new(cipher: PayloadCipher) -> Self {
        Self {
            channels: DashMap::new(),
            cipher,
        }
    }

    /// Subscribe a connection to a room's event stream.
    pub fn subscribe(&self, room_id: RoomId) -> broadcast::Receiver<ServerEvent> {
        self.channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Emit an event to every subscriber of a room. A room with no
    /// subscribers drops the event.
    pub fn send(&self, room_id: RoomId, event: ServerEvent) {
        if let Some(tx) = self.channels.get(&room_id) {
            let _ = tx.send(event);
        }
    }

    /// Seal a room snapshot, broadcast it to the room, and return the same
    /// event so the caller can unicast it to the acting connection (which
    /// may not be subscribed yet, e.g. right after join).
    pub fn room_updated(
        &self,
        room_id: RoomId,
        view: &RoomView,
    ) -> Result<ServerEvent, CipherError> {
        let event = ServerEvent::RoomUpdated {
            encrypted_data: self.cipher.seal(view)?,
        };
        self.send(room_id, event.clone());
        Ok(event)
    }

    /// Drop channels nobody listens to anymore.
    pub fn prune_idle(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before - self.channels.len()
    }

    pub fn room_count(&self) -> usize {
        self.channels.len()
    }
}
