//! Session context.
//!
//! Everything observers and callers share about one connection lives here
//! and is passed explicitly; nothing in the crate reaches for globals.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::RoomStore;

/// Identity fields rewritten into outgoing traffic. `None` leaves the real
/// value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpoofProfile {
    pub rank: Option<i32>,
    pub team: Option<i32>,
    pub platform: Option<String>,
    pub throwable_amount: Option<i32>,
    /// Prefixed onto the player name as `[tag] name`.
    pub clan_tag: Option<String>,
}

impl SpoofProfile {
    /// Whether any field would cause a rewrite.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.rank.is_some()
            || self.team.is_some()
            || self.platform.is_some()
            || self.throwable_amount.is_some()
            || self.clan_tag.is_some()
    }
}

/// Server-reported settings captured from the authentication exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerSettings {
    pub region: Option<String>,
    pub app_version: Option<String>,
}

/// Shared state for one intercepted connection.
pub struct Session {
    store: Arc<RoomStore>,
    profile: SpoofProfile,
    connected: AtomicBool,
    connection_id: AtomicI64,
    client_id: AtomicI64,
    server: RwLock<ServerSettings>,
}

impl Session {
    #[must_use]
    pub fn new(profile: SpoofProfile) -> Self {
        Self {
            store: Arc::new(RoomStore::new()),
            profile,
            connected: AtomicBool::new(false),
            connection_id: AtomicI64::new(-1),
            client_id: AtomicI64::new(-1),
            server: RwLock::new(ServerSettings::default()),
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<RoomStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn profile(&self) -> &SpoofProfile {
        &self.profile
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// The connection id assigned by the server, or `None` before approval.
    #[must_use]
    pub fn connection_id(&self) -> Option<i64> {
        match self.connection_id.load(Ordering::Acquire) {
            -1 => None,
            id => Some(id),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> Option<i64> {
        match self.client_id.load(Ordering::Acquire) {
            -1 => None,
            id => Some(id),
        }
    }

    /// Record the identity assigned by the connection approval.
    pub fn set_identity(&self, connection_id: i64, client_id: i64) {
        self.connection_id.store(connection_id, Ordering::Release);
        self.client_id.store(client_id, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        info!(connection_id, client_id, "Connection approved");
    }

    #[must_use]
    pub fn server_settings(&self) -> ServerSettings {
        self.server
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_server_settings(&self, settings: ServerSettings) {
        *self.server.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Tear the session down after a disconnect: identity, connectivity,
    /// and room state all reset.
    pub fn reset(&self) {
        self.connected.store(false, Ordering::Release);
        self.connection_id.store(-1, Ordering::Release);
        self.client_id.store(-1, Ordering::Release);
        *self.server.write().unwrap_or_else(PoisonError::into_inner) = ServerSettings::default();
        self.store.clear();
        info!("Session reset");
    }
}
