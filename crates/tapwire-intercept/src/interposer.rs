//! The transport interposer.
//!
//! Wraps exactly one connection: everything the application sends goes
//! through the outbound channel before the wire, everything the wire
//! delivers goes through the inbound channel before the application. The
//! interposer owns the session context and the canonical observers; nothing
//! here touches globals.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use tapwire_core::{
    CacheObserver, InterceptConfig, Pipeline, RawSender, RosterObserver, SendError,
    ServerSettingsObserver, Session, SpoofObserver,
};
use tapwire_protocol::{
    classify, codec, CodecError, DecodePolicy, Decoded, Envelope, MessageKind, Value, WireFrame,
    WireMode,
};

use crate::traits::{Transport, TransportError};

/// Interposition errors.
#[derive(Debug, Error)]
pub enum InterposeError {
    /// Encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The underlying transport rejected the frame.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// How an outgoing envelope left the interposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Default forwarding: the (possibly rewritten) envelope was encoded
    /// once and sent.
    Forwarded,
    /// An observer took over delivery; default forwarding was suppressed.
    Handled,
}

struct TransportSender<'a, T: Transport>(&'a T);

impl<T: Transport> RawSender for TransportSender<'_, T> {
    fn send_frame(&self, frame: WireFrame) -> Result<(), SendError> {
        self.0.send(frame).map_err(|e| SendError(e.to_string()))
    }
}

/// One interposed connection.
pub struct Interposer<T: Transport> {
    transport: T,
    session: Arc<Session>,
    pipeline: Pipeline,
    mode: WireMode,
    policy: DecodePolicy,
}

impl<T: Transport> Interposer<T> {
    /// Wrap a transport, wiring up the canonical observers from `config`.
    ///
    /// Outbound registration order matters: the spoof observer runs before
    /// the cache observer, so the cached copy of a rewritten RPC reflects
    /// the rewrite.
    #[must_use]
    pub fn new(transport: T, config: &InterceptConfig) -> Self {
        let session = Arc::new(Session::new(config.spoof.clone()));
        let pipeline = Pipeline::new();

        pipeline
            .outbound
            .subscribe(Arc::new(SpoofObserver::new(config.spoof.clone())));
        pipeline
            .outbound
            .subscribe(Arc::new(ServerSettingsObserver::new(Arc::clone(&session))));
        pipeline.outbound.subscribe(Arc::new(CacheObserver::new(
            session.store(),
            config.cache.inbound,
            config.cache.outbound,
        )));

        pipeline
            .inbound
            .subscribe(Arc::new(RosterObserver::new(session.store())));
        pipeline.inbound.subscribe(Arc::new(CacheObserver::new(
            session.store(),
            config.cache.inbound,
            config.cache.outbound,
        )));

        if config.debug.log_outbound {
            pipeline
                .outbound
                .subscribe(Arc::new(|ctx: &mut tapwire_core::OutboundCtx<'_>| {
                    debug!(
                        kind = ctx.envelope.kind,
                        key = ctx.classified.dispatch_key.as_deref().unwrap_or(""),
                        "Outgoing envelope"
                    );
                }));
        }
        if config.debug.log_inbound {
            pipeline
                .inbound
                .subscribe(Arc::new(|ctx: &tapwire_core::InboundCtx<'_>| {
                    debug!(
                        kind = ctx.envelope.kind,
                        key = ctx.classified.dispatch_key.as_deref().unwrap_or(""),
                        "Incoming envelope"
                    );
                }));
        }

        Self {
            transport,
            session,
            pipeline,
            mode: config.wire_mode(),
            policy: config.decode_policy(),
        }
    }

    #[must_use]
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// The observer channels, for registering additional observers.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Send an envelope through the outbound channel and, unless an
    /// observer took over delivery, encode it once and put it on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, encoding fails, or the
    /// transport rejects the frame; the message is not delivered in that
    /// case.
    pub fn send(&self, mut envelope: Envelope) -> Result<SendOutcome, InterposeError> {
        if !self.transport.is_open() {
            return Err(InterposeError::Transport(TransportError::ConnectionClosed));
        }
        let classified = classify(&envelope);
        let sender = TransportSender(&self.transport);
        let report =
            self.pipeline
                .outbound
                .dispatch(&mut envelope, &classified, self.mode, &sender);
        if report.faults > 0 {
            warn!(faults = report.faults, "Outbound observer faults isolated");
        }
        if report.handled {
            return Ok(SendOutcome::Handled);
        }

        let frame = codec::encode(&envelope, self.mode)?;
        self.transport
            .send(frame)
            .map_err(InterposeError::Transport)?;
        Ok(SendOutcome::Forwarded)
    }

    /// Process one frame received from the wire: decode it, update session
    /// identity on connection approval, then fan it out to the inbound
    /// channel. Returns the decoded result so the embedding layer can hand
    /// the envelope to the application.
    ///
    /// # Errors
    ///
    /// Returns an error only under the strict decode policy; the lenient
    /// policy recovers and reports diagnostics on the returned [`Decoded`].
    pub fn handle_incoming(&self, frame: &WireFrame) -> Result<Decoded, InterposeError> {
        let decoded = codec::decode(frame, self.policy)?;
        if !decoded.is_clean() {
            debug!(
                diagnostics = decoded.diagnostics.len(),
                "Inbound frame decoded with recoveries"
            );
        }

        let classified = classify(&decoded.envelope);
        if classified.kind == Some(MessageKind::ConnectionApproved) {
            self.capture_identity(&decoded.envelope);
        }

        let report = self
            .pipeline
            .inbound
            .dispatch(&decoded.envelope, &classified);
        if report.faults > 0 {
            warn!(faults = report.faults, "Inbound observer faults isolated");
        }
        Ok(decoded)
    }

    fn capture_identity(&self, envelope: &Envelope) {
        let Some(payload) = envelope.payload.as_map() else {
            return;
        };
        let client_id = payload.get("clientId").and_then(Value::as_i64);
        let connection_id = payload
            .get("connectionId")
            .and_then(Value::as_i64)
            .or(client_id);
        if let (Some(connection_id), Some(client_id)) = (connection_id, client_id) {
            self.session.set_identity(connection_id, client_id);
        }
    }

    /// The wrapped connection opened.
    pub fn on_open(&self) {
        info!("Connection opened");
        self.session.set_connected(true);
    }

    /// The wrapped connection closed; the session resets so a reconnect
    /// starts clean.
    pub fn on_close(&self) {
        info!("Connection closed");
        self.session.reset();
    }

    /// The wrapped connection reported a transport-level error. The
    /// connected flag drops; full teardown waits for [`Interposer::on_close`].
    pub fn on_error(&self, error: &TransportError) {
        warn!(%error, "Transport error");
        self.session.set_connected(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tapwire_protocol::{MessageKind, ValueMap};

    struct MockTransport {
        frames: Mutex<Vec<WireFrame>>,
        open: bool,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                frames: Mutex::new(Vec::new()),
                open: true,
            }
        }

        fn closed() -> Self {
            Self {
                open: false,
                ..Self::new()
            }
        }

        fn sent(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn approved_frame(client_id: i64) -> WireFrame {
        let mut payload = ValueMap::new();
        payload.insert("clientId", Value::Int64(client_id));
        let env =
            Envelope::with_timestamp(MessageKind::ConnectionApproved, 0, Value::Map(payload));
        codec::encode(&env, WireMode::Binary).unwrap()
    }

    #[test]
    fn test_plain_send_forwards_once() {
        let interposer = Interposer::new(MockTransport::new(), &InterceptConfig::default());
        let env = Envelope::new(MessageKind::Ping, Value::Map(ValueMap::new()));
        let outcome = interposer.send(env).unwrap();
        assert_eq!(outcome, SendOutcome::Forwarded);
        assert_eq!(interposer.transport().sent(), 1);
    }

    #[test]
    fn test_spoofed_rpc_is_handled_not_double_sent() {
        let mut config = InterceptConfig::default();
        config.spoof.rank = Some(99);

        let interposer = Interposer::new(MockTransport::new(), &config);

        let mut params = ValueMap::new();
        params.insert("rank", Value::integer(5));
        let mut payload = ValueMap::new();
        payload.insert("methodName", "UpdatePlayerData");
        payload.insert("parameters", Value::Map(params));
        let env = Envelope::new(MessageKind::RpcReliable, Value::Map(payload));

        let outcome = interposer.send(env).unwrap();
        assert_eq!(outcome, SendOutcome::Handled);
        assert_eq!(interposer.transport().sent(), 1);
    }

    #[test]
    fn test_send_on_closed_connection_is_refused() {
        let interposer = Interposer::new(MockTransport::closed(), &InterceptConfig::default());
        let env = Envelope::new(MessageKind::Ping, Value::Map(ValueMap::new()));
        let result = interposer.send(env);
        assert!(matches!(
            result,
            Err(InterposeError::Transport(TransportError::ConnectionClosed))
        ));
        assert_eq!(interposer.transport().sent(), 0);
    }

    #[test]
    fn test_identity_captured_from_first_approval() {
        let interposer = Interposer::new(MockTransport::new(), &InterceptConfig::default());
        assert!(interposer.session().client_id().is_none());

        interposer.handle_incoming(&approved_frame(42)).unwrap();
        assert_eq!(interposer.session().client_id(), Some(42));
        assert!(interposer.session().is_connected());
    }

    #[test]
    fn test_close_resets_session() {
        let interposer = Interposer::new(MockTransport::new(), &InterceptConfig::default());
        interposer.handle_incoming(&approved_frame(42)).unwrap();

        interposer.on_close();
        assert!(!interposer.session().is_connected());
        assert!(interposer.session().client_id().is_none());
    }

    #[test]
    fn test_error_drops_connected_flag() {
        let interposer = Interposer::new(MockTransport::new(), &InterceptConfig::default());
        interposer.handle_incoming(&approved_frame(42)).unwrap();
        assert!(interposer.session().is_connected());

        interposer.on_error(&TransportError::Other("socket reset".into()));
        assert!(!interposer.session().is_connected());
        // Identity survives until close tears the session down.
        assert_eq!(interposer.session().client_id(), Some(42));
    }

    #[test]
    fn test_end_to_end_rewrite_and_cache_ordering() {
        let mut config = InterceptConfig::default();
        config.spoof.rank = Some(99);

        let interposer = Interposer::new(MockTransport::new(), &config);

        let mut params = ValueMap::new();
        params.insert("rank", Value::integer(5));
        params.insert("team", Value::integer(2));
        let mut payload = ValueMap::new();
        payload.insert("methodName", "UpdatePlayerData");
        payload.insert("parameters", Value::Map(params));
        let env = Envelope::with_timestamp(MessageKind::RpcReliable, 1000, Value::Map(payload));

        // Round-trip sanity before interposition.
        let frame = codec::encode(&env, WireMode::Binary).unwrap();
        let decoded = codec::decode(&frame, DecodePolicy::Strict).unwrap();
        assert_eq!(decoded.envelope, env);

        assert_eq!(interposer.send(env).unwrap(), SendOutcome::Handled);

        // Downstream frame carries the rewrite with untouched siblings.
        let frames = interposer.transport().frames.lock().unwrap();
        let sent = codec::decode(&frames[0], DecodePolicy::Strict)
            .unwrap()
            .envelope;
        let params = sent
            .payload
            .get("parameters")
            .and_then(Value::as_map)
            .unwrap();
        assert_eq!(params.get("rank").unwrap().as_i64(), Some(99));
        assert_eq!(params.get("team").unwrap().as_i64(), Some(2));
        drop(frames);

        // The cache observer runs after the spoof observer, so the cached
        // copy reflects the rewrite too.
        let store = interposer.session().store();
        let export = store.export_cache(&store.room_key()).unwrap();
        let cached = export.outbound[0]
            .payload
            .get("parameters")
            .and_then(Value::as_map)
            .unwrap()
            .clone();
        assert_eq!(cached.get("rank").unwrap().as_i64(), Some(99));
    }

    #[test]
    fn test_inbound_roster_reconciliation() {
        let interposer = Interposer::new(MockTransport::new(), &InterceptConfig::default());

        let mut spawn = ValueMap::new();
        spawn.insert("objectId", Value::Int64(77));
        spawn.insert("ownerId", Value::Int64(5));
        spawn.insert("prefabId", "Player");
        let env = Envelope::with_timestamp(MessageKind::Spawn, 0, Value::Map(spawn));
        let frame = codec::encode(&env, WireMode::Binary).unwrap();
        interposer.handle_incoming(&frame).unwrap();

        // Transform for an object nobody owns creates a placeholder.
        let mut transform = ValueMap::new();
        transform.insert("objectId", Value::Int64(99));
        transform.insert("position", Value::Vec3(tapwire_protocol::Vec3::new(1.0, 0.0, 1.0)));
        let env = Envelope::with_timestamp(MessageKind::TransformSync, 0, Value::Map(transform));
        let frame = codec::encode(&env, WireMode::Binary).unwrap();
        interposer.handle_incoming(&frame).unwrap();

        let store = interposer.session().store();
        let roster = store.list_participants(&store.room_key());
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].participant_id, 5);
        assert_eq!(roster[0].object_id, Some(77));
        assert_eq!(roster[1].participant_id, 99);
    }

    #[test]
    fn test_lenient_decode_surfaces_diagnostics() {
        let interposer = Interposer::new(MockTransport::new(), &InterceptConfig::default());
        let frame = WireFrame::Binary(bytes::Bytes::from_static(&[20, 0, 0]));
        let decoded = interposer.handle_incoming(&frame).unwrap();
        assert!(!decoded.is_clean());
    }
}
