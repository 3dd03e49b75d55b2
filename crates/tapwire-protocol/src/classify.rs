//! Message classification.
//!
//! A pure function from an envelope to routing metadata: the typed message
//! kind and, for RPCs, the dispatch key. Classification never mutates the
//! envelope.

use crate::envelope::{Envelope, MessageKind};

/// Routing metadata derived from one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The typed kind, or `None` for an unrecognized kind byte.
    pub kind: Option<MessageKind>,
    /// The RPC dispatch key, if this is an RPC with one.
    pub dispatch_key: Option<String>,
}

impl Classified {
    /// Whether the dispatch key matches any of the given method names.
    #[must_use]
    pub fn dispatches_as(&self, names: &[&str]) -> bool {
        self.dispatch_key
            .as_deref()
            .is_some_and(|key| names.contains(&key))
    }
}

/// Classify an envelope.
///
/// For RPC kinds the dispatch key is the payload's `methodName` string;
/// payloads using the legacy numeric `eventCode` convention are recognized
/// and rewritten to the canonical `Event_<code>` form, so both naming
/// schemes dispatch identically downstream.
#[must_use]
pub fn classify(envelope: &Envelope) -> Classified {
    let kind = MessageKind::try_from(envelope.kind).ok();

    let dispatch_key = match kind {
        Some(k) if k.is_rpc() => {
            if let Some(name) = envelope.payload.get("methodName").and_then(|v| v.as_str()) {
                Some(name.to_string())
            } else {
                envelope
                    .payload
                    .get("eventCode")
                    .and_then(|v| v.as_i64())
                    .map(|code| format!("Event_{code}"))
            }
        }
        _ => None,
    };

    Classified { kind, dispatch_key }
}
