//! Canonical pipeline observers.
//!
//! These are the built-in observers an interposer wires up from its
//! configuration: roster reconciliation, packet caching, identity
//! rewriting, and server-settings capture. All of them hold `Arc` handles
//! to explicitly passed state.

use std::sync::Arc;

use tracing::{debug, trace};

use tapwire_protocol::{Envelope, MessageKind, Value, ValueMap};

use crate::pipeline::{InboundCtx, InboundObserver, OutboundCtx, OutboundObserver};
use crate::session::{ServerSettings, Session, SpoofProfile};
use crate::store::{Direction, RoomStore};

fn payload_map(envelope: &Envelope) -> Option<&ValueMap> {
    envelope.payload.as_map()
}

fn i64_field(map: &ValueMap, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_i64)
}

/// Reconciles the room roster from inbound traffic: spawns, despawns,
/// roster RPCs, replicated variables, and transform updates.
pub struct RosterObserver {
    store: Arc<RoomStore>,
}

impl RosterObserver {
    #[must_use]
    pub fn new(store: Arc<RoomStore>) -> Self {
        Self { store }
    }

    fn apply_rpc(&self, ctx: &InboundCtx<'_>, payload: &ValueMap) {
        let Some(sender) = i64_field(payload, "senderId") else {
            return;
        };
        let empty = ValueMap::new();
        let params = payload
            .get("parameters")
            .and_then(Value::as_map)
            .unwrap_or(&empty);

        if ctx.classified.dispatches_as(&["PlayerJoined", "Event_255"]) {
            self.store.join(sender, params);
        } else if ctx.classified.dispatches_as(&["PlayerLeft", "Event_254"]) {
            self.store.leave(sender);
        } else if ctx
            .classified
            .dispatches_as(&["UpdatePlayerState", "Event_201"])
        {
            self.store.state_update(sender, params);
        }
    }
}

impl InboundObserver for RosterObserver {
    fn on_inbound(&self, ctx: &InboundCtx<'_>) {
        let Some(payload) = payload_map(ctx.envelope) else {
            return;
        };
        match ctx.classified.kind {
            Some(MessageKind::Spawn) => self.store.spawn(payload),
            Some(MessageKind::Despawn) => {
                if let Some(object_id) = i64_field(payload, "objectId") {
                    self.store.despawn(object_id);
                }
            }
            Some(MessageKind::SyncVar) => {
                if let (Some(object_id), Some(name)) = (
                    i64_field(payload, "objectId"),
                    payload.get("varName").and_then(Value::as_str),
                ) {
                    let value = payload.get("value").cloned().unwrap_or(Value::Null);
                    self.store.sync_var(object_id, name, &value);
                }
            }
            Some(MessageKind::TransformSync) => {
                if let Some(object_id) = i64_field(payload, "objectId") {
                    self.store.transform_sync(object_id, payload);
                }
            }
            Some(MessageKind::RpcReliable | MessageKind::RpcUnreliable) => {
                self.apply_rpc(ctx, payload);
            }
            _ => {}
        }
    }
}

/// Appends observed packets to the current room's caches.
pub struct CacheObserver {
    store: Arc<RoomStore>,
    cache_inbound: bool,
    cache_outbound: bool,
}

impl CacheObserver {
    #[must_use]
    pub fn new(store: Arc<RoomStore>, cache_inbound: bool, cache_outbound: bool) -> Self {
        Self {
            store,
            cache_inbound,
            cache_outbound,
        }
    }
}

impl InboundObserver for CacheObserver {
    fn on_inbound(&self, ctx: &InboundCtx<'_>) {
        if self.cache_inbound {
            self.store.append_packet(Direction::Inbound, ctx.envelope);
        }
    }
}

impl OutboundObserver for CacheObserver {
    fn on_outbound(&self, ctx: &mut OutboundCtx<'_>) {
        if self.cache_outbound {
            self.store.append_packet(Direction::Outbound, ctx.envelope);
        }
    }
}

/// Rewrites identity fields in the two outgoing self-describing RPCs.
///
/// A matched RPC is always re-sent through the original-send capability and
/// the unmodified original suppressed, whether or not the profile changed
/// anything. A configured field only overwrites a parameter the message
/// actually carries.
pub struct SpoofObserver {
    profile: SpoofProfile,
}

impl SpoofObserver {
    #[must_use]
    pub fn new(profile: SpoofProfile) -> Self {
        Self { profile }
    }

    fn rewrite_common(&self, params: &mut ValueMap) {
        if let Some(tag) = &self.profile.clan_tag {
            if let Some(name) = params.get("playerName").and_then(Value::as_str) {
                let tagged = format!("[{tag}] {name}");
                params.insert("playerName", tagged);
            }
        }
    }

    fn rewrite_spawn(&self, params: &mut ValueMap) {
        if let Some(platform) = &self.profile.platform {
            if params.contains_key("platform") {
                params.insert("platform", platform.clone());
            }
        }
        self.rewrite_common(params);
    }

    fn rewrite_update(&self, params: &mut ValueMap) {
        if let Some(rank) = self.profile.rank {
            if params.contains_key("rank") {
                params.insert("rank", Value::integer(i64::from(rank)));
            }
        }
        if let Some(team) = self.profile.team {
            if params.contains_key("team") {
                params.insert("team", Value::integer(i64::from(team)));
            }
        }
        if let Some(amount) = self.profile.throwable_amount {
            if params.contains_key("throwable_amount") {
                params.insert("throwable_amount", Value::integer(i64::from(amount)));
            }
        }
        self.rewrite_common(params);
    }
}

impl OutboundObserver for SpoofObserver {
    fn on_outbound(&self, ctx: &mut OutboundCtx<'_>) {
        let is_spawn = ctx.classified.dispatches_as(&["SpawnPlayer", "Event_252"]);
        let is_update = ctx
            .classified
            .dispatches_as(&["UpdatePlayerData", "Event_226"]);
        if !is_spawn && !is_update {
            return;
        }

        if let Some(params) = ctx
            .envelope
            .payload
            .as_map_mut()
            .and_then(|p| p.get_mut("parameters"))
            .and_then(Value::as_map_mut)
        {
            if is_spawn {
                self.rewrite_spawn(params);
            } else {
                self.rewrite_update(params);
            }
        }

        match ctx.send_now() {
            Ok(true) => debug!(
                key = ctx.classified.dispatch_key.as_deref().unwrap_or(""),
                "Rewritten RPC re-sent, original suppressed"
            ),
            Ok(false) => trace!("Rewrite skipped, message already handled"),
            Err(err) => debug!(%err, "Immediate send failed, rewritten payload forwards normally"),
        }
    }
}

/// Captures region and version from the outgoing authentication message.
pub struct ServerSettingsObserver {
    session: Arc<Session>,
}

impl ServerSettingsObserver {
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl OutboundObserver for ServerSettingsObserver {
    fn on_outbound(&self, ctx: &mut OutboundCtx<'_>) {
        if ctx.classified.kind != Some(MessageKind::Authenticate) {
            return;
        }
        let Some(payload) = payload_map(ctx.envelope) else {
            return;
        };
        let settings = ServerSettings {
            region: payload
                .get("region")
                .and_then(Value::as_str)
                .map(str::to_string),
            app_version: payload
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        debug!(
            region = settings.region.as_deref().unwrap_or("?"),
            version = settings.app_version.as_deref().unwrap_or("?"),
            "Authentication observed"
        );
        self.session.set_server_settings(settings);
    }
}
