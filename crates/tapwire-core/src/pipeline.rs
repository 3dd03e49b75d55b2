//! The interception pipeline: two fan-out channels that classified traffic
//! flows through before it reaches the wire (outbound) or the application
//! (inbound).
//!
//! Guarantees, per channel:
//! - every registered observer runs exactly once per message, in
//!   registration order;
//! - a panicking observer is isolated and logged, and never prevents
//!   siblings from running or delivery from happening;
//! - on the outbound channel, the first observer to take over delivery
//!   ("handled") wins; later observers still run but cannot double-send.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, trace};

use tapwire_protocol::{codec, Classified, Envelope, WireFrame, WireMode};

/// Failure to hand a frame to the underlying transport.
#[derive(Debug, Clone, Error)]
#[error("send failed: {0}")]
pub struct SendError(pub String);

/// The original-send capability handed to outbound observers: a direct
/// line to the real transport, bypassing the pipeline.
pub trait RawSender {
    /// Send a frame on the wrapped connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying transport rejects the frame.
    fn send_frame(&self, frame: WireFrame) -> Result<(), SendError>;
}

/// Handle for one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// An observer on the outbound (pre-send) channel.
///
/// May mutate the payload in place and let default forwarding continue, or
/// send a replacement itself via [`OutboundCtx::send_now`].
pub trait OutboundObserver: Send + Sync {
    fn on_outbound(&self, ctx: &mut OutboundCtx<'_>);
}

impl<F> OutboundObserver for F
where
    F: Fn(&mut OutboundCtx<'_>) + Send + Sync,
{
    fn on_outbound(&self, ctx: &mut OutboundCtx<'_>) {
        self(ctx);
    }
}

/// An observer on the inbound (post-receive) channel. Observation only.
pub trait InboundObserver: Send + Sync {
    fn on_inbound(&self, ctx: &InboundCtx<'_>);
}

impl<F> InboundObserver for F
where
    F: Fn(&InboundCtx<'_>) + Send + Sync,
{
    fn on_inbound(&self, ctx: &InboundCtx<'_>) {
        self(ctx);
    }
}

/// A fire-and-forget asynchronous inbound observer.
///
/// The dispatch loop spawns the work and does not await it: no ordering
/// exists between its completion and subsequent messages, and connection
/// close does not cancel it.
#[async_trait]
pub trait AsyncInboundObserver: Send + Sync + 'static {
    async fn observe(&self, envelope: Envelope, classified: Classified);
}

/// Context handed to each outbound observer.
pub struct OutboundCtx<'a> {
    /// The in-flight envelope; mutations flow into default forwarding.
    pub envelope: &'a mut Envelope,
    /// Routing metadata derived before dispatch began. Not re-derived
    /// after observers mutate the payload.
    pub classified: &'a Classified,
    mode: WireMode,
    sender: &'a dyn RawSender,
    handled: bool,
}

impl OutboundCtx<'_> {
    /// The wire mode of this connection.
    #[must_use]
    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Whether an earlier observer already took over delivery.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Take over delivery without sending anything (suppression).
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Encode the current (possibly rewritten) envelope and send it via the
    /// original-send capability, taking over delivery.
    ///
    /// First-wins: if delivery was already taken over, nothing is sent and
    /// `Ok(false)` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the transport send fails; delivery
    /// is not marked handled in that case.
    pub fn send_now(&mut self) -> Result<bool, SendError> {
        if self.handled {
            trace!("send_now skipped: message already handled");
            return Ok(false);
        }
        let frame =
            codec::encode(self.envelope, self.mode).map_err(|e| SendError(e.to_string()))?;
        self.sender.send_frame(frame)?;
        self.handled = true;
        Ok(true)
    }
}

/// Context handed to each inbound observer.
pub struct InboundCtx<'a> {
    pub envelope: &'a Envelope,
    pub classified: &'a Classified,
}

/// Outcome of one channel dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// An observer took over delivery (outbound only).
    pub handled: bool,
    /// Number of observers that panicked and were isolated.
    pub faults: usize,
}

/// Ordered observer registry shared by both channel types.
struct Registry<T: ?Sized> {
    observers: RwLock<Vec<(ObserverId, Arc<T>)>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    fn subscribe(&self, observer: Arc<T>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot for dispatch, so observers may unsubscribe themselves.
    fn snapshot(&self) -> Vec<(ObserverId, Arc<T>)> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

/// The outbound (pre-send) channel.
#[derive(Default)]
pub struct OutboundChannel {
    registry: Registry<dyn OutboundObserver>,
}

impl OutboundChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn OutboundObserver>) -> ObserverId {
        let id = self.registry.subscribe(observer);
        debug!(observer = id.0, "Outbound observer registered");
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.registry.unsubscribe(id)
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }

    /// Run every observer once, in registration order.
    pub fn dispatch(
        &self,
        envelope: &mut Envelope,
        classified: &Classified,
        mode: WireMode,
        sender: &dyn RawSender,
    ) -> DispatchReport {
        let mut ctx = OutboundCtx {
            envelope,
            classified,
            mode,
            sender,
            handled: false,
        };
        let mut faults = 0;
        for (id, observer) in self.registry.snapshot() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer.on_outbound(&mut ctx))) {
                faults += 1;
                error!(
                    observer = id.0,
                    panic = panic_message(panic.as_ref()),
                    "Outbound observer fault isolated"
                );
            }
        }
        DispatchReport {
            handled: ctx.handled,
            faults,
        }
    }
}

/// The inbound (post-receive) channel.
#[derive(Default)]
pub struct InboundChannel {
    registry: Registry<dyn InboundObserver>,
}

impl InboundChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn InboundObserver>) -> ObserverId {
        let id = self.registry.subscribe(observer);
        debug!(observer = id.0, "Inbound observer registered");
        id
    }

    /// Register an async observer through a spawning adapter. Requires a
    /// running tokio runtime at dispatch time.
    pub fn subscribe_async(&self, observer: Arc<dyn AsyncInboundObserver>) -> ObserverId {
        struct Spawner(Arc<dyn AsyncInboundObserver>);

        impl InboundObserver for Spawner {
            fn on_inbound(&self, ctx: &InboundCtx<'_>) {
                let observer = Arc::clone(&self.0);
                let envelope = ctx.envelope.clone();
                let classified = ctx.classified.clone();
                tokio::spawn(async move {
                    observer.observe(envelope, classified).await;
                });
            }
        }

        self.subscribe(Arc::new(Spawner(observer)))
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.registry.unsubscribe(id)
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }

    /// Run every observer once, in registration order.
    pub fn dispatch(&self, envelope: &Envelope, classified: &Classified) -> DispatchReport {
        let ctx = InboundCtx {
            envelope,
            classified,
        };
        let mut faults = 0;
        for (id, observer) in self.registry.snapshot() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer.on_inbound(&ctx))) {
                faults += 1;
                error!(
                    observer = id.0,
                    panic = panic_message(panic.as_ref()),
                    "Inbound observer fault isolated"
                );
            }
        }
        DispatchReport {
            handled: false,
            faults,
        }
    }
}

/// The outbound/inbound channel pair for one connection.
#[derive(Default)]
pub struct Pipeline {
    pub outbound: OutboundChannel,
    pub inbound: InboundChannel,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tapwire_protocol::{classify, MessageKind, Value, ValueMap};

    #[derive(Default)]
    struct RecordingSender {
        frames: Mutex<Vec<WireFrame>>,
        fail: bool,
    }

    impl RawSender for RecordingSender {
        fn send_frame(&self, frame: WireFrame) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError("socket closed".into()));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn sample_envelope() -> Envelope {
        let mut payload = ValueMap::new();
        payload.insert("methodName", "UpdatePlayerData");
        Envelope::with_timestamp(MessageKind::RpcReliable, 1000, Value::Map(payload))
    }

    #[test]
    fn test_fan_out_survives_panicking_observer() {
        let channel = OutboundChannel::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&calls);
        channel.subscribe(Arc::new(move |_: &mut OutboundCtx<'_>| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        channel.subscribe(Arc::new(|_: &mut OutboundCtx<'_>| {
            panic!("observer two exploded");
        }));
        let c3 = Arc::clone(&calls);
        channel.subscribe(Arc::new(move |_: &mut OutboundCtx<'_>| {
            c3.fetch_add(1, Ordering::SeqCst);
        }));

        let mut env = sample_envelope();
        let classified = classify(&env);
        let sender = RecordingSender::default();
        let report = channel.dispatch(&mut env, &classified, WireMode::Binary, &sender);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.faults, 1);
        assert!(!report.handled);
    }

    #[test]
    fn test_first_handled_wins_no_double_send() {
        let channel = OutboundChannel::new();
        channel.subscribe(Arc::new(|ctx: &mut OutboundCtx<'_>| {
            assert_eq!(ctx.send_now().unwrap(), true);
        }));
        // Second observer still runs but cannot send again.
        let second_ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&second_ran);
        channel.subscribe(Arc::new(move |ctx: &mut OutboundCtx<'_>| {
            flag.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.send_now().unwrap(), false);
        }));

        let mut env = sample_envelope();
        let classified = classify(&env);
        let sender = RecordingSender::default();
        let report = channel.dispatch(&mut env, &classified, WireMode::Binary, &sender);

        assert!(report.handled);
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
        assert_eq!(sender.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_send_now_failure_leaves_unhandled() {
        let channel = OutboundChannel::new();
        channel.subscribe(Arc::new(|ctx: &mut OutboundCtx<'_>| {
            assert!(ctx.send_now().is_err());
            assert!(!ctx.is_handled());
        }));

        let mut env = sample_envelope();
        let classified = classify(&env);
        let sender = RecordingSender {
            fail: true,
            ..Default::default()
        };
        let report = channel.dispatch(&mut env, &classified, WireMode::Binary, &sender);
        assert!(!report.handled);
    }

    #[test]
    fn test_mutations_are_visible_to_later_observers() {
        let channel = OutboundChannel::new();
        channel.subscribe(Arc::new(|ctx: &mut OutboundCtx<'_>| {
            if let Some(map) = ctx.envelope.payload.as_map_mut() {
                map.insert("rank", Value::integer(99));
            }
        }));
        channel.subscribe(Arc::new(|ctx: &mut OutboundCtx<'_>| {
            assert_eq!(ctx.envelope.payload.get("rank"), Some(&Value::Int8(99)));
        }));

        let mut env = sample_envelope();
        let classified = classify(&env);
        let sender = RecordingSender::default();
        channel.dispatch(&mut env, &classified, WireMode::Binary, &sender);
        assert_eq!(env.payload.get("rank"), Some(&Value::Int8(99)));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let channel = InboundChannel::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let id = channel.subscribe(Arc::new(move |_: &InboundCtx<'_>| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        let env = sample_envelope();
        let classified = classify(&env);
        channel.dispatch(&env, &classified);
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        channel.dispatch(&env, &classified);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_observer_is_fire_and_forget() {
        struct Counter(Arc<AtomicUsize>);

        #[async_trait]
        impl AsyncInboundObserver for Counter {
            async fn observe(&self, _envelope: Envelope, _classified: Classified) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let channel = InboundChannel::new();
        let calls = Arc::new(AtomicUsize::new(0));
        channel.subscribe_async(Arc::new(Counter(Arc::clone(&calls))));

        let env = sample_envelope();
        let classified = classify(&env);
        channel.dispatch(&env, &classified);

        // Not awaited by dispatch; give the spawned task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
