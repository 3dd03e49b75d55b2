//! Envelope and message-kind definitions.
//!
//! Every message on the wire is an envelope: a kind byte, a signed
//! millisecond timestamp, and a payload from the [`Value`] grammar.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

/// Milliseconds since the Unix epoch, as carried by envelope timestamps.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The top-level wire structure: `{kind, timestamp, payload}`.
///
/// `kind` stays a raw byte here; mapping it onto the closed
/// [`MessageKind`] enum is the classifier's job, so envelopes with
/// unrecognized kinds still flow through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind discriminant.
    pub kind: u8,
    /// Sender timestamp in milliseconds.
    pub timestamp: i64,
    /// Message payload, conventionally a map.
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: MessageKind, payload: Value) -> Self {
        Self {
            kind: kind as u8,
            timestamp: now_ms(),
            payload,
        }
    }

    /// Create an envelope with an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(kind: MessageKind, timestamp: i64, payload: Value) -> Self {
        Self {
            kind: kind as u8,
            timestamp,
            payload,
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            kind: 0,
            timestamp: 0,
            payload: Value::Map(Default::default()),
        }
    }
}

/// The closed set of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MessageKind {
    // Connection management
    ConnectionRequest = 0,
    ConnectionApproved = 1,
    ConnectionRejected = 2,
    Disconnect = 3,

    // Authentication
    Authenticate = 10,
    AuthResponse = 11,

    // Object lifecycle
    Spawn = 20,
    Despawn = 21,
    ChangeOwnership = 22,

    // Data synchronization
    RpcReliable = 30,
    RpcUnreliable = 31,
    SyncVar = 32,
    TransformSync = 33,

    // System
    Ping = 40,
    Pong = 41,
    TimeSync = 42,
}

impl MessageKind {
    /// Whether this kind carries an RPC payload with a dispatch key.
    #[must_use]
    pub fn is_rpc(self) -> bool {
        matches!(self, MessageKind::RpcReliable | MessageKind::RpcUnreliable)
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::ConnectionRequest),
            1 => Ok(MessageKind::ConnectionApproved),
            2 => Ok(MessageKind::ConnectionRejected),
            3 => Ok(MessageKind::Disconnect),
            10 => Ok(MessageKind::Authenticate),
            11 => Ok(MessageKind::AuthResponse),
            20 => Ok(MessageKind::Spawn),
            21 => Ok(MessageKind::Despawn),
            22 => Ok(MessageKind::ChangeOwnership),
            30 => Ok(MessageKind::RpcReliable),
            31 => Ok(MessageKind::RpcUnreliable),
            32 => Ok(MessageKind::SyncVar),
            33 => Ok(MessageKind::TransformSync),
            40 => Ok(MessageKind::Ping),
            41 => Ok(MessageKind::Pong),
            42 => Ok(MessageKind::TimeSync),
            _ => Err("Unknown message kind"),
        }
    }
}

/// Who should receive an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum RpcTarget {
    /// Server only.
    Server = 0,
    /// All other clients.
    Others = 1,
    /// All clients including the sender.
    All = 2,
    /// The object's owner.
    Owner = 3,
    /// All observers of the object.
    Observers = 4,
}

impl From<RpcTarget> for u8 {
    fn from(t: RpcTarget) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for RpcTarget {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RpcTarget::Server),
            1 => Ok(RpcTarget::Others),
            2 => Ok(RpcTarget::All),
            3 => Ok(RpcTarget::Owner),
            4 => Ok(RpcTarget::Observers),
            _ => Err("Unknown RPC target"),
        }
    }
}

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Delivery {
    /// Guaranteed delivery.
    #[default]
    Reliable = 0,
    /// No delivery guarantee, no ordering.
    Unreliable = 1,
    /// Guaranteed delivery and order.
    ReliableOrdered = 2,
}

impl From<Delivery> for u8 {
    fn from(d: Delivery) -> u8 {
        d as u8
    }
}

impl TryFrom<u8> for Delivery {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Delivery::Reliable),
            1 => Ok(Delivery::Unreliable),
            2 => Ok(Delivery::ReliableOrdered),
            _ => Err("Unknown delivery channel"),
        }
    }
}
