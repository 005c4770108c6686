use bytes::Bytes;
use tokio::sync::{broadcast, watch};

use crate::error::Result;
use crate::event::TransportEvent;

/// A live communication channel to one logical endpoint space.
///
/// Implemented by [`crate::TcpTransport`] for a single physical link and by
/// [`crate::AggregatedTransport`] for several redundant ones. The trait is
/// object-safe so devices can bind to either behind `Arc<dyn Transport>`.
///
/// `connect`/`disconnect` toggle the *desired* state only; the transport
/// reconciles the actual socket toward it in the background and reports
/// progress through [`TransportEvent`]s.
pub trait Transport: Send + Sync {
    /// Ask the transport to be connected.
    fn connect(&self);

    /// Ask the transport to be disconnected.
    fn disconnect(&self);

    /// Force an immediate teardown-and-retry of the current connection.
    fn reconnect(&self);

    /// Queue one frame body for transmission.
    ///
    /// Fails with [`crate::TransportError::NotConnected`] while the link is
    /// down — callers are expected to gate on [`Transport::is_connected`].
    fn write(&self, body: Bytes) -> Result<()>;

    /// Subscribe to transport notifications and inbound frames.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Current actual connection state.
    fn is_connected(&self) -> bool;

    /// Watchable actual connection state.
    fn watch_connected(&self) -> watch::Receiver<bool>;

    /// Multiplex identifier width in bytes (0 = one implicit device).
    fn identifier_len(&self) -> usize;

    /// Reserve a device identifier on this transport.
    ///
    /// Validates the width against [`Transport::identifier_len`] and
    /// rejects duplicates; both are construction-time configuration bugs.
    fn bind_identifier(&self, ident: &[u8]) -> Result<()>;
}
