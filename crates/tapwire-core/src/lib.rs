//! # tapwire-core
//!
//! Interception pipeline, room state store, and session context for the
//! tapwire stream interception layer.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Pipeline** - Outbound/inbound observer channels with fault isolation
//! - **RoomStore** - Per-room rosters and append-only packet caches
//! - **Session** - Explicit per-connection state, no globals
//! - **Observers** - Canonical roster, cache, spoof, and settings observers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Interposer │────▶│   Pipeline   │────▶│  Transport  │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │  RoomStore   │
//!                     └──────────────┘
//! ```

pub mod config;
pub mod observers;
pub mod pipeline;
pub mod roster;
pub mod session;
pub mod store;

pub use config::InterceptConfig;
pub use observers::{CacheObserver, RosterObserver, ServerSettingsObserver, SpoofObserver};
pub use pipeline::{
    AsyncInboundObserver, DispatchReport, InboundChannel, InboundCtx, InboundObserver, ObserverId,
    OutboundChannel, OutboundCtx, OutboundObserver, Pipeline, RawSender, SendError,
};
pub use roster::{PlayerRecord, RoomRoster};
pub use session::{ServerSettings, Session, SpoofProfile};
pub use store::{CacheExport, Direction, RoomKey, RoomStore};
