//! Room state store.
//!
//! One entry per room: a roster plus two append-only packet caches, one per
//! traffic direction. The store tracks which room is current; roster and
//! cache operations apply to it. Switching rooms never discards state, so a
//! room the player returns to picks up where it left off.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use tapwire_protocol::{Envelope, Value, ValueMap};

use crate::roster::{PlayerRecord, RoomRoster};

/// Which side of the connection a cached packet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the server.
    Inbound,
    /// Sent by the client.
    Outbound,
}

/// Identity of one room.
///
/// Display form is `"{name} {id}"`, which is also the on-disk cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RoomKey {
    pub name: String,
    pub id: String,
}

impl RoomKey {
    #[must_use]
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl Default for RoomKey {
    fn default() -> Self {
        Self::new("Unknown", "Unknown")
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.id)
    }
}

/// A serializable dump of one room's packet caches.
#[derive(Debug, Clone, Serialize)]
pub struct CacheExport {
    pub room: String,
    pub inbound: Vec<Envelope>,
    pub outbound: Vec<Envelope>,
}

#[derive(Default)]
struct RoomEntry {
    roster: RoomRoster,
    inbound: Vec<Envelope>,
    outbound: Vec<Envelope>,
}

/// All per-room state for one session.
#[derive(Default)]
pub struct RoomStore {
    rooms: DashMap<RoomKey, RoomEntry>,
    current: RwLock<RoomKey>,
}

impl RoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the current room, creating its entry if unseen.
    pub fn set_room(&self, key: RoomKey) {
        self.rooms.entry(key.clone()).or_default();
        info!(room = %key, "Current room set");
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = key;
    }

    #[must_use]
    pub fn room_key(&self) -> RoomKey {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop all room state and reset the current room.
    pub fn clear(&self) {
        self.rooms.clear();
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = RoomKey::default();
        debug!("Room store cleared");
    }

    #[must_use]
    pub fn room_keys(&self) -> Vec<RoomKey> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut RoomEntry) -> R) -> R {
        let key = self.room_key();
        let mut entry = self.rooms.entry(key).or_default();
        f(entry.value_mut())
    }

    pub fn spawn(&self, params: &ValueMap) {
        self.with_current(|e| e.roster.spawn(params));
    }

    pub fn despawn(&self, object_id: i64) {
        self.with_current(|e| e.roster.despawn(object_id));
    }

    pub fn join(&self, participant_id: i64, params: &ValueMap) {
        self.with_current(|e| e.roster.join(participant_id, params));
    }

    pub fn leave(&self, participant_id: i64) {
        self.with_current(|e| e.roster.leave(participant_id));
    }

    pub fn state_update(&self, participant_id: i64, params: &ValueMap) {
        self.with_current(|e| e.roster.state_update(participant_id, params));
    }

    pub fn sync_var(&self, object_id: i64, name: &str, value: &Value) {
        self.with_current(|e| e.roster.sync_var(object_id, name, value));
    }

    pub fn transform_sync(&self, object_id: i64, params: &ValueMap) {
        self.with_current(|e| e.roster.transform_sync(object_id, params));
    }

    /// Append one packet to the current room's cache for `direction`.
    /// Caches are append-only; capture order is preserved.
    pub fn append_packet(&self, direction: Direction, envelope: &Envelope) {
        self.with_current(|e| match direction {
            Direction::Inbound => e.inbound.push(envelope.clone()),
            Direction::Outbound => e.outbound.push(envelope.clone()),
        });
    }

    /// Roster snapshot for a room, sorted by participant id. Empty for an
    /// unknown room.
    #[must_use]
    pub fn list_participants(&self, key: &RoomKey) -> Vec<PlayerRecord> {
        self.rooms
            .get(key)
            .map(|e| e.roster.snapshot())
            .unwrap_or_default()
    }

    /// Export both packet caches for a room, or `None` if unseen.
    #[must_use]
    pub fn export_cache(&self, key: &RoomKey) -> Option<CacheExport> {
        self.rooms.get(key).map(|e| CacheExport {
            room: key.to_string(),
            inbound: e.inbound.clone(),
            outbound: e.outbound.clone(),
        })
    }
}
