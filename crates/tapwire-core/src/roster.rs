//! Per-room player roster.
//!
//! One record per participant, keyed by participant id. Records are created
//! on first sight from whichever message arrives first (spawn, join, state
//! update, or transform for an unseen object id) and patched in place by
//! everything after. Unrecognized ids never error; the roster reconciles
//! whatever the stream tells it.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace};

use tapwire_protocol::{Quat, Value, ValueMap, Vec3};

/// Everything known about one participant in the current room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerRecord {
    pub participant_id: i64,
    /// The networked object owned by this participant, once spawned.
    pub object_id: Option<i64>,
    pub name: String,
    pub rank: i32,
    pub kd: f32,
    pub team: i32,
    pub kills: i32,
    pub deaths: i32,
    pub platform: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub pitch: f32,
    pub yaw: f32,
    pub health: f32,
    pub ping: i32,
    pub velocity: Option<Vec3>,
}

impl PlayerRecord {
    #[must_use]
    pub fn new(participant_id: i64) -> Self {
        Self {
            participant_id,
            object_id: None,
            name: "Unknown".to_string(),
            rank: 0,
            kd: 0.0,
            team: 0,
            kills: 0,
            deaths: 0,
            platform: "Unknown".to_string(),
            position: Vec3::default(),
            rotation: Quat::default(),
            pitch: 0.0,
            yaw: 0.0,
            health: 100.0,
            ping: 0,
            velocity: None,
        }
    }
}

/// Read a `Vec3` out of a roster field, accepting either the typed variant
/// or an `{x, y, z}` map from a text-mode stream.
fn vec3_from(value: &Value) -> Option<Vec3> {
    match value {
        Value::Vec3(v) => Some(*v),
        Value::Map(map) => {
            let component = |key: &str| map.get(key).and_then(Value::as_f64).map(|n| n as f32);
            Some(Vec3::new(component("x")?, component("y")?, component("z")?))
        }
        _ => None,
    }
}

fn quat_from(value: &Value) -> Option<Quat> {
    match value {
        Value::Quat(q) => Some(*q),
        Value::Map(map) => {
            let component = |key: &str| map.get(key).and_then(Value::as_f64).map(|n| n as f32);
            Some(Quat::new(
                component("x")?,
                component("y")?,
                component("z")?,
                component("w")?,
            ))
        }
        _ => None,
    }
}

fn str_field(params: &ValueMap, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn i32_field(params: &ValueMap, key: &str) -> Option<i32> {
    params.get(key).and_then(Value::as_i64).map(|n| n as i32)
}

fn f32_field(params: &ValueMap, key: &str) -> Option<f32> {
    params.get(key).and_then(Value::as_f64).map(|n| n as f32)
}

/// The roster for one room.
#[derive(Debug, Default, Serialize)]
pub struct RoomRoster {
    players: HashMap<i64, PlayerRecord>,
}

impl RoomRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    #[must_use]
    pub fn get(&self, participant_id: i64) -> Option<&PlayerRecord> {
        self.players.get(&participant_id)
    }

    #[must_use]
    pub fn find_by_object(&self, object_id: i64) -> Option<&PlayerRecord> {
        self.players
            .values()
            .find(|p| p.object_id == Some(object_id))
    }

    /// All records, sorted by participant id for stable output.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PlayerRecord> {
        let mut records: Vec<PlayerRecord> = self.players.values().cloned().collect();
        records.sort_by_key(|p| p.participant_id);
        records
    }

    fn entry(&mut self, participant_id: i64) -> &mut PlayerRecord {
        self.players
            .entry(participant_id)
            .or_insert_with(|| PlayerRecord::new(participant_id))
    }

    /// Record a spawn of a player object. Non-player prefabs are ignored.
    pub fn spawn(&mut self, params: &ValueMap) {
        let Some(prefab) = params.get("prefabId").and_then(Value::as_str) else {
            return;
        };
        if prefab != "Player" && prefab != "PlayerPrefab" {
            trace!(prefab, "Ignoring non-player spawn");
            return;
        }
        let Some(owner) = params.get("ownerId").and_then(Value::as_i64) else {
            return;
        };
        let object_id = params.get("objectId").and_then(Value::as_i64);

        let record = self.entry(owner);
        record.object_id = object_id;
        if let Some(position) = params.get("position").and_then(vec3_from) {
            record.position = position;
        }
        if let Some(rotation) = params.get("rotation").and_then(quat_from) {
            record.rotation = rotation;
        }
        debug!(owner, object_id, "Player object spawned");
    }

    /// Remove the record whose object despawned, if any.
    pub fn despawn(&mut self, object_id: i64) {
        let owner = self
            .players
            .values()
            .find(|p| p.object_id == Some(object_id))
            .map(|p| p.participant_id);
        if let Some(owner) = owner {
            self.players.remove(&owner);
            debug!(owner, object_id, "Player object despawned");
        }
    }

    /// A participant joined the room.
    pub fn join(&mut self, participant_id: i64, params: &ValueMap) {
        let record = self.entry(participant_id);
        if let Some(name) = str_field(params, "playerName") {
            record.name = name;
        }
        if let Some(rank) = i32_field(params, "rank") {
            record.rank = rank;
        }
        if let Some(kd) = f32_field(params, "kd") {
            record.kd = kd;
        }
        if let Some(team) = i32_field(params, "team") {
            record.team = team;
        }
        if let Some(platform) = str_field(params, "platform") {
            record.platform = platform;
        }
        debug!(participant_id, name = %record.name, "Participant joined");
    }

    pub fn leave(&mut self, participant_id: i64) {
        if self.players.remove(&participant_id).is_some() {
            debug!(participant_id, "Participant left");
        }
    }

    /// Partial state patch for a participant; absent fields keep their
    /// current values.
    pub fn state_update(&mut self, participant_id: i64, params: &ValueMap) {
        let record = self.entry(participant_id);
        if let Some(position) = params.get("position").and_then(vec3_from) {
            record.position = position;
        }
        if let Some(rotation) = params.get("rotation").and_then(quat_from) {
            record.rotation = rotation;
        }
        if let Some(health) = f32_field(params, "health") {
            record.health = health;
        }
        if let Some(kills) = i32_field(params, "kills") {
            record.kills = kills;
        }
        if let Some(pitch) = f32_field(params, "pitch") {
            record.pitch = pitch;
        }
        if let Some(yaw) = f32_field(params, "yaw") {
            record.yaw = yaw;
        }
        if let Some(ping) = i32_field(params, "ping") {
            record.ping = ping;
        }
    }

    /// Apply one replicated variable to the record owning `object_id`. An
    /// unseen object id creates a placeholder record keyed by that id, the
    /// same out-of-order tolerance as [`RoomRoster::transform_sync`].
    /// Unknown variable names are ignored.
    pub fn sync_var(&mut self, object_id: i64, name: &str, value: &Value) {
        let owner = self
            .players
            .values()
            .find(|p| p.object_id == Some(object_id))
            .map(|p| p.participant_id)
            .unwrap_or(object_id);

        let record = self.entry(owner);
        if record.object_id.is_none() {
            record.object_id = Some(object_id);
        }
        match name {
            "health" => {
                if let Some(n) = value.as_f64() {
                    record.health = n as f32;
                }
            }
            "kills" => {
                if let Some(n) = value.as_i64() {
                    record.kills = n as i32;
                }
            }
            "deaths" => {
                if let Some(n) = value.as_i64() {
                    record.deaths = n as i32;
                }
            }
            "team" => {
                if let Some(n) = value.as_i64() {
                    record.team = n as i32;
                }
            }
            other => trace!(object_id, name = other, "Unrecognized sync var"),
        }
    }

    /// Apply a transform update to the record owning `object_id`. An unseen
    /// object id creates a placeholder record keyed by that id, so movement
    /// is never dropped while the spawn that names the owner is in flight.
    pub fn transform_sync(&mut self, object_id: i64, params: &ValueMap) {
        let owner = self
            .players
            .values()
            .find(|p| p.object_id == Some(object_id))
            .map(|p| p.participant_id)
            .unwrap_or(object_id);

        let record = self.entry(owner);
        if record.object_id.is_none() {
            record.object_id = Some(object_id);
        }
        if let Some(position) = params.get("position").and_then(vec3_from) {
            record.position = position;
        }
        if let Some(rotation) = params.get("rotation").and_then(quat_from) {
            record.rotation = rotation;
        }
        if let Some(velocity) = params.get("velocity").and_then(vec3_from) {
            record.velocity = Some(velocity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_params(prefab: &str, owner: i64, object: i64) -> ValueMap {
        let mut params = ValueMap::new();
        params.insert("prefabId", prefab);
        params.insert("ownerId", Value::Int64(owner));
        params.insert("objectId", Value::Int64(object));
        params.insert("position", Value::Vec3(Vec3::new(1.0, 2.0, 3.0)));
        params
    }

    #[test]
    fn test_spawn_creates_record_with_defaults() {
        let mut roster = RoomRoster::new();
        roster.spawn(&spawn_params("Player", 5, 77));

        let record = roster.get(5).unwrap();
        assert_eq!(record.object_id, Some(77));
        assert_eq!(record.name, "Unknown");
        assert_eq!(record.platform, "Unknown");
        assert_eq!(record.health, 100.0);
        assert_eq!(record.rotation, Quat::default());
        assert_eq!(record.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_non_player_prefab_is_ignored() {
        let mut roster = RoomRoster::new();
        roster.spawn(&spawn_params("GrenadeProjectile", 5, 77));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_join_patches_existing_record() {
        let mut roster = RoomRoster::new();
        roster.spawn(&spawn_params("Player", 5, 77));

        let mut params = ValueMap::new();
        params.insert("playerName", "Ace");
        params.insert("rank", Value::integer(12));
        params.insert("team", Value::integer(2));
        roster.join(5, &params);

        let record = roster.get(5).unwrap();
        assert_eq!(record.name, "Ace");
        assert_eq!(record.rank, 12);
        assert_eq!(record.team, 2);
        // Spawn data survives the join patch.
        assert_eq!(record.object_id, Some(77));
    }

    #[test]
    fn test_state_update_patches_only_present_fields() {
        let mut roster = RoomRoster::new();
        let mut join = ValueMap::new();
        join.insert("playerName", "Ace");
        roster.join(5, &join);

        let mut params = ValueMap::new();
        params.insert("health", Value::Float32(40.0));
        params.insert("kills", Value::integer(3));
        roster.state_update(5, &params);

        let record = roster.get(5).unwrap();
        assert_eq!(record.health, 40.0);
        assert_eq!(record.kills, 3);
        assert_eq!(record.name, "Ace");
    }

    #[test]
    fn test_sync_var_routes_by_object_id() {
        let mut roster = RoomRoster::new();
        roster.spawn(&spawn_params("Player", 5, 77));

        roster.sync_var(77, "health", &Value::Float32(25.5));
        roster.sync_var(77, "deaths", &Value::integer(4));
        roster.sync_var(77, "unknown_var", &Value::integer(1));

        let record = roster.get(5).unwrap();
        assert_eq!(record.health, 25.5);
        assert_eq!(record.deaths, 4);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_sync_var_for_unknown_object_creates_placeholder() {
        let mut roster = RoomRoster::new();
        roster.sync_var(99, "health", &Value::Float32(25.0));

        let record = roster.find_by_object(99).unwrap();
        assert_eq!(record.participant_id, 99);
        assert_eq!(record.health, 25.0);
        assert_eq!(record.name, "Unknown");
    }

    #[test]
    fn test_transform_for_unknown_object_creates_placeholder() {
        let mut roster = RoomRoster::new();
        let mut params = ValueMap::new();
        params.insert("position", Value::Vec3(Vec3::new(9.0, 0.0, 9.0)));
        roster.transform_sync(99, &params);

        let record = roster.find_by_object(99).unwrap();
        assert_eq!(record.participant_id, 99);
        assert_eq!(record.position, Vec3::new(9.0, 0.0, 9.0));

        // A later velocity-only patch leaves the position intact.
        let mut params = ValueMap::new();
        params.insert("velocity", Value::Vec3(Vec3::new(0.0, -2.0, 0.0)));
        roster.transform_sync(99, &params);
        let record = roster.find_by_object(99).unwrap();
        assert_eq!(record.position, Vec3::new(9.0, 0.0, 9.0));
        assert_eq!(record.velocity, Some(Vec3::new(0.0, -2.0, 0.0)));
    }

    #[test]
    fn test_despawn_and_leave_remove_records() {
        let mut roster = RoomRoster::new();
        roster.spawn(&spawn_params("Player", 5, 77));
        roster.join(6, &ValueMap::new());

        roster.despawn(77);
        assert!(roster.get(5).is_none());
        roster.despawn(77);

        roster.leave(6);
        assert!(roster.is_empty());
    }

    #[test]
    fn test_vec3_accepted_as_map() {
        let mut roster = RoomRoster::new();
        let mut pos = ValueMap::new();
        pos.insert("x", Value::Float32(1.5));
        pos.insert("y", Value::Float32(2.5));
        pos.insert("z", Value::Float32(3.5));
        let mut params = ValueMap::new();
        params.insert("position", Value::Map(pos));
        roster.state_update(5, &params);

        assert_eq!(roster.get(5).unwrap().position, Vec3::new(1.5, 2.5, 3.5));
    }
}
