//! Room registry: two explicit role slots per room (spec §3 "Room"), the
//! generalization of the teacher's implicit one-agent-one-browser
//! `SignalingChannel` (`crates/server/src/signaling.rs`) into an explicit
//! `Capture`/`Viewer` pair keyed by room id.

use std::collections::HashMap;
use std::sync::Arc;

use glint_protocol::{Role, SignalingMessage};
use tokio::sync::{broadcast, Notify, RwLock};

/// Per-role broadcast channel plus a kick signal for the eviction policy:
/// a second join of an occupied role evicts the incumbent (Design Note §9,
/// grounded in the teacher's `browser_kick: Notify` "newest wins" pattern).
pub struct RoleSlot {
    pub to_peer: broadcast::Sender<SignalingMessage>,
    pub kick: Notify,
    pub occupied: RwLock<bool>,
}

impl RoleSlot {
    fn new() -> Self {
        let (to_peer, _) = broadcast::channel(64);
        Self {
            to_peer,
            kick: Notify::new(),
            occupied: RwLock::new(false),
        }
    }
}

/// One room: exactly two role slots (spec §3).
pub struct Room {
    pub capture: RoleSlot,
    pub viewer: RoleSlot,
}

impl Room {
    fn new() -> Self {
        Self {
            capture: RoleSlot::new(),
            viewer: RoleSlot::new(),
        }
    }

    pub fn slot(&self, role: Role) -> &RoleSlot {
        match role {
            Role::Capture => &self.capture,
            Role::Viewer => &self.viewer,
        }
    }

    pub async fn is_occupied(&self, role: Role) -> bool {
        *self.slot(role).occupied.read().await
    }
}

/// Registry of active rooms keyed by room id.
pub type RoomRegistry = Arc<RwLock<HashMap<String, Arc<Room>>>>;

pub fn new_room_registry() -> RoomRegistry {
    Arc::new(RwLock::new(HashMap::new()))
}

pub async fn get_or_create_room(registry: &RoomRegistry, room_id: &str) -> Arc<Room> {
    {
        let rooms = registry.read().await;
        if let Some(room) = rooms.get(room_id) {
            return Arc::clone(room);
        }
    }

    let mut rooms = registry.write().await;
    rooms
        .entry(room_id.to_string())
        .or_insert_with(|| Arc::new(Room::new()))
        .clone()
}

/// Remove a room once both roles have departed and there is nothing left
/// to relay (mirrors the teacher's `remove_channel` on session teardown).
pub async fn remove_room_if_empty(registry: &RoomRegistry, room_id: &str) {
    let mut rooms = registry.write().await;
    if let Some(room) = rooms.get(room_id) {
        if !room.is_occupied(Role::Capture).await && !room.is_occupied(Role::Viewer).await {
            rooms.remove(room_id);
            tracing::debug!(room = room_id, "room removed (both roles vacated)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_room_is_idempotent() {
        let registry = new_room_registry();
        let a = get_or_create_room(&registry, "r1").await;
        let b = get_or_create_room(&registry, "r1").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn distinct_rooms_are_independent() {
        let registry = new_room_registry();
        let a = get_or_create_room(&registry, "r1").await;
        let b = get_or_create_room(&registry, "r2").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn empty_room_is_removed() {
        let registry = new_room_registry();
        get_or_create_room(&registry, "r1").await;
        remove_room_if_empty(&registry, "r1").await;
        assert_eq!(registry.read().await.len(), 0);
    }

    #[tokio::test]
    async fn occupied_room_is_not_removed() {
        let registry = new_room_registry();
        let room = get_or_create_room(&registry, "r1").await;
        *room.capture.occupied.write().await = true;
        remove_room_if_empty(&registry, "r1").await;
        assert_eq!(registry.read().await.len(), 1);
    }
}
