//! # tapwire-protocol
//!
//! Wire protocol for the tapwire interception layer: a dual-mode
//! (binary/text) self-describing codec for the envelope format used by the
//! intercepted game stream, plus the pure message classifier that derives
//! routing metadata from decoded envelopes.
//!
//! ## Example
//!
//! ```rust
//! use tapwire_protocol::{classify, codec, Envelope, MessageKind, Value, ValueMap};
//! use tapwire_protocol::codec::{DecodePolicy, WireMode};
//!
//! let mut payload = ValueMap::new();
//! payload.insert("methodName", "UpdatePlayerData");
//! let env = Envelope::new(MessageKind::RpcReliable, Value::Map(payload));
//!
//! let frame = codec::encode(&env, WireMode::Binary).unwrap();
//! let decoded = codec::decode(&frame, DecodePolicy::Strict).unwrap();
//! assert_eq!(decoded.envelope, env);
//!
//! let routed = classify(&decoded.envelope);
//! assert_eq!(routed.dispatch_key.as_deref(), Some("UpdatePlayerData"));
//! ```

pub mod classify;
pub mod codec;
pub mod envelope;
pub mod reader;
pub mod writer;

mod value;

pub use classify::{classify, Classified};
pub use codec::{CodecError, DecodeDiagnostic, DecodePolicy, Decoded, WireFrame, WireMode};
pub use envelope::{now_ms, Delivery, Envelope, MessageKind, RpcTarget};
pub use value::{Quat, Value, ValueMap, Vec3};
