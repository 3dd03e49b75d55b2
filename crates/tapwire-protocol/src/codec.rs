//! Dual-mode envelope codec.
//!
//! A connection speaks either tagged binary or JSON text for its lifetime.
//! Encoding is total for well-formed envelopes; decoding is total under the
//! lenient policy (malformed input degrades to defaults plus diagnostics)
//! and fail-fast under the strict policy used by tests.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::reader::Reader;
use crate::writer::Writer;

/// Wire representation mode for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireMode {
    /// Tagged binary envelopes.
    #[default]
    Binary,
    /// JSON text envelopes.
    Text,
}

/// How decode reacts to malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Degrade: defaults for the broken slot, diagnostics on the side.
    #[default]
    Lenient,
    /// Fail on the first malformed slot.
    Strict,
}

/// One frame as it travels on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Binary(Bytes),
    Text(String),
}

impl WireFrame {
    /// Frame size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Binary(b) => b.len(),
            WireFrame::Text(t) => t.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The wire mode this frame belongs to.
    #[must_use]
    pub fn mode(&self) -> WireMode {
        match self {
            WireFrame::Binary(_) => WireMode::Binary,
            WireFrame::Text(_) => WireMode::Text,
        }
    }
}

/// A recoverable decode anomaly.
///
/// Under the lenient policy these are collected and decoding continues;
/// under the strict policy the first one aborts the decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeDiagnostic {
    #[error("unknown value tag {0}")]
    UnknownTag(u8),

    #[error("buffer truncated reading {what}: need {needed} bytes, {remaining} remain")]
    Truncated {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("negative length {0} for {1}")]
    NegativeLength(i32, &'static str),

    #[error("{what} count {count} exceeds remaining buffer of {remaining} bytes")]
    CountOverflow {
        what: &'static str,
        count: usize,
        remaining: usize,
    },

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("value nesting exceeds depth limit")]
    DepthExceeded,

    #[error("malformed text envelope: {0}")]
    MalformedText(String),
}

/// Codec errors (strict decode failures and encode failures).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeDiagnostic),

    #[error("text encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A decoded envelope together with any recoverable-decode diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub envelope: Envelope,
    pub diagnostics: Vec<DecodeDiagnostic>,
}

impl Decoded {
    /// Whether the input decoded without degradation.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Encode an envelope in the given wire mode.
///
/// # Errors
///
/// Returns an error only if text serialization fails.
pub fn encode(envelope: &Envelope, mode: WireMode) -> Result<WireFrame, CodecError> {
    match mode {
        WireMode::Binary => {
            let mut writer = Writer::new();
            writer.put_envelope(envelope);
            Ok(WireFrame::Binary(writer.finish()))
        }
        WireMode::Text => Ok(WireFrame::Text(serde_json::to_string(envelope)?)),
    }
}

/// Decode a wire frame.
///
/// Text frames are parsed as JSON; on success the parse result *is* the
/// message and no byte parsing happens. Binary frames go through the tagged
/// reader. Under [`DecodePolicy::Lenient`] this never fails.
///
/// # Errors
///
/// Under [`DecodePolicy::Strict`], returns the first malformed slot.
pub fn decode(frame: &WireFrame, policy: DecodePolicy) -> Result<Decoded, CodecError> {
    match frame {
        WireFrame::Text(text) => match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => Ok(Decoded {
                envelope,
                diagnostics: Vec::new(),
            }),
            Err(err) => {
                let diag = DecodeDiagnostic::MalformedText(err.to_string());
                match policy {
                    DecodePolicy::Strict => Err(diag.into()),
                    DecodePolicy::Lenient => {
                        tracing::warn!(error = %diag, "Degrading malformed text frame");
                        Ok(Decoded {
                            envelope: Envelope::default(),
                            diagnostics: vec![diag],
                        })
                    }
                }
            }
        },
        WireFrame::Binary(bytes) => {
            let mut reader = Reader::new(bytes, policy);
            let envelope = reader.read_envelope()?;
            let diagnostics = reader.into_diagnostics();
            if !diagnostics.is_empty() {
                tracing::warn!(
                    count = diagnostics.len(),
                    "Binary frame decoded with degradation"
                );
            }
            Ok(Decoded {
                envelope,
                diagnostics,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageKind;
    use crate::value::{Quat, Value, ValueMap, Vec3};

    fn deep_sample() -> Value {
        // Covers all 13 tags with nesting depth >= 3.
        let mut inner = ValueMap::new();
        inner.insert("null", Value::Null);
        inner.insert("bool", Value::Bool(true));
        inner.insert("i8", Value::Int8(5));
        inner.insert("i16", Value::Int16(5000));
        inner.insert("i32", Value::Int32(100_000));
        inner.insert("i64", Value::Int64(1 << 40));
        inner.insert("f32", Value::Float32(5.5));
        inner.insert("f64", Value::Float64(2.25));
        inner.insert("str", Value::Str("payload".into()));
        inner.insert("vec", Value::Vec3(Vec3::new(1.0, 2.0, 3.0)));
        inner.insert("quat", Value::Quat(Quat::new(0.0, 0.0, 0.0, 1.0)));

        let mut mid = ValueMap::new();
        mid.insert("inner", Value::Map(inner));
        mid.insert(
            "list",
            Value::Array(vec![
                Value::Int8(1),
                Value::Str("two".into()),
                Value::Array(vec![Value::Bool(false), Value::Null]),
            ]),
        );

        let mut outer = ValueMap::new();
        outer.insert("mid", Value::Map(mid));
        outer.insert("empty", Value::Str(String::new()));
        Value::Map(outer)
    }

    #[test]
    fn test_binary_round_trip_all_tags_strict() {
        let env = Envelope::with_timestamp(MessageKind::RpcReliable, 123_456_789, deep_sample());
        let frame = encode(&env, WireMode::Binary).unwrap();
        let decoded = decode(&frame, DecodePolicy::Strict).unwrap();
        assert!(decoded.is_clean());
        assert_eq!(decoded.envelope, env);
    }

    #[test]
    fn test_text_round_trip() {
        let mut payload = ValueMap::new();
        payload.insert("methodName", "UpdatePlayerData");
        payload.insert("rank", Value::integer(5));
        let env = Envelope::with_timestamp(MessageKind::RpcReliable, 1000, Value::Map(payload));

        let frame = encode(&env, WireMode::Text).unwrap();
        let decoded = decode(&frame, DecodePolicy::Strict).unwrap();
        assert_eq!(decoded.envelope, env);
    }

    #[test]
    fn test_integer_width_selection_on_wire() {
        // The writer narrows the int family to the smallest fitting tag.
        for (value, expected_tag) in [
            (Value::Int32(5), 2u8),
            (Value::Int32(5000), 3),
            (Value::Int32(100_000), 4),
            (Value::Float32(5.5), 6),
        ] {
            let env = Envelope::with_timestamp(MessageKind::Ping, 0, value);
            let frame = encode(&env, WireMode::Binary).unwrap();
            let WireFrame::Binary(bytes) = frame else {
                unreachable!()
            };
            // Payload tag sits after kind (1B) and timestamp (8B).
            assert_eq!(bytes[9], expected_tag);
        }
    }

    #[test]
    fn test_empty_string_round_trips_with_zero_prefix() {
        let env = Envelope::with_timestamp(MessageKind::Ping, 0, Value::Str(String::new()));
        let frame = encode(&env, WireMode::Binary).unwrap();
        let WireFrame::Binary(bytes) = &frame else {
            unreachable!()
        };
        // tag + 4-byte zero length
        assert_eq!(&bytes[9..14], &[8, 0, 0, 0, 0]);
        let decoded = decode(&frame, DecodePolicy::Strict).unwrap();
        assert_eq!(decoded.envelope.payload, Value::Str(String::new()));
    }

    #[test]
    fn test_multibyte_utf8_round_trips() {
        let s = "ねこ🐾 émile";
        let env = Envelope::with_timestamp(MessageKind::Ping, 0, Value::Str(s.into()));
        let frame = encode(&env, WireMode::Binary).unwrap();
        let decoded = decode(&frame, DecodePolicy::Strict).unwrap();
        assert_eq!(decoded.envelope.payload.as_str(), Some(s));
    }

    #[test]
    fn test_lenient_decode_of_truncated_buffer() {
        let env = Envelope::with_timestamp(MessageKind::SyncVar, 42, deep_sample());
        let frame = encode(&env, WireMode::Binary).unwrap();
        let WireFrame::Binary(bytes) = frame else {
            unreachable!()
        };
        let truncated = WireFrame::Binary(bytes.slice(..bytes.len() / 2));

        let decoded = decode(&truncated, DecodePolicy::Lenient).unwrap();
        assert!(!decoded.is_clean());
        assert_eq!(decoded.envelope.kind, MessageKind::SyncVar as u8);
        assert_eq!(decoded.envelope.timestamp, 42);

        // The same input raises under strict.
        assert!(decode(&truncated, DecodePolicy::Strict).is_err());
    }

    #[test]
    fn test_lenient_unknown_tag_yields_null() {
        // kind, timestamp, then an unassigned tag byte.
        let mut raw = vec![MessageKind::Ping as u8];
        raw.extend_from_slice(&0i64.to_le_bytes());
        raw.push(42);
        let frame = WireFrame::Binary(Bytes::from(raw));

        let decoded = decode(&frame, DecodePolicy::Lenient).unwrap();
        assert_eq!(decoded.envelope.payload, Value::Null);
        assert_eq!(decoded.diagnostics, vec![DecodeDiagnostic::UnknownTag(42)]);

        match decode(&frame, DecodePolicy::Strict) {
            Err(CodecError::Decode(DecodeDiagnostic::UnknownTag(42))) => {}
            other => panic!("Expected UnknownTag error, got {other:?}"),
        }
    }

    #[test]
    fn test_lenient_malformed_text_degrades() {
        let frame = WireFrame::Text("not json at all".into());
        let decoded = decode(&frame, DecodePolicy::Lenient).unwrap();
        assert!(!decoded.is_clean());
        assert_eq!(decoded.envelope, Envelope::default());

        assert!(decode(&frame, DecodePolicy::Strict).is_err());
    }

    #[test]
    fn test_narrowed_int32_decodes_as_int8() {
        // Documented precision-of-variant loss: Int32(5) narrows on the wire.
        let env = Envelope::with_timestamp(MessageKind::Ping, 0, Value::Int32(5));
        let frame = encode(&env, WireMode::Binary).unwrap();
        let decoded = decode(&frame, DecodePolicy::Strict).unwrap();
        assert_eq!(decoded.envelope.payload, Value::Int8(5));
    }
}
