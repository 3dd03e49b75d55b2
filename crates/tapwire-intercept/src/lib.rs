//! # tapwire-intercept
//!
//! Transport interposition for the tapwire stream interception layer.
//!
//! This crate wraps a single connection so that every message crosses the
//! interception pipeline:
//!
//! - **Transport** - The send half of one connection, as a trait
//! - **Interposer** - Wraps a transport, owns the session and pipeline
//! - **Client** - High-level message constructors over an interposer
//!
//! ```rust,ignore
//! use tapwire_core::InterceptConfig;
//! use tapwire_intercept::{Client, Interposer};
//!
//! let config = InterceptConfig::load()?;
//! let interposer = Interposer::new(my_transport, &config);
//! let client = Client::new(interposer);
//! client.ping()?;
//! ```

pub mod client;
pub mod interposer;
pub mod traits;

pub use client::{Client, ReceiverGroup, RpcOptions};
pub use interposer::{Interposer, InterposeError, SendOutcome};
pub use traits::{Transport, TransportError};
