//! Transport abstraction for the interposer.
//!
//! The interposer wraps exactly one connection and talks to it through this
//! trait, so the same interception stack runs over any byte transport.

use thiserror::Error;

use tapwire_protocol::WireFrame;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// One bidirectional connection the interposer can send frames on.
///
/// Receiving is push-based: the integration layer feeds frames it pulled
/// off the wire into [`Interposer::handle_incoming`], so this trait only
/// covers the send half and liveness.
///
/// [`Interposer::handle_incoming`]: crate::Interposer::handle_incoming
pub trait Transport: Send + Sync {
    /// Send an encoded frame to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be delivered.
    fn send(&self, frame: WireFrame) -> Result<(), TransportError>;

    /// Check if the connection is still open. Outbound sends are refused
    /// once this returns `false`.
    fn is_open(&self) -> bool {
        true
    }
}
