use bytes::Bytes;

/// Notifications emitted by a transport.
///
/// Delivered over a `tokio::sync::broadcast` channel: many listeners,
/// fire-and-forget, no stringly-typed event names.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The socket connected.
    Connected,

    /// The link stayed up for a full debounce window after connecting.
    ///
    /// Rapid connect/disconnect flapping is coalesced: consumers that only
    /// care about a usable link should wait for this instead of
    /// [`TransportEvent::Connected`].
    StableConnected,

    /// The socket went down (error, EOF, liveness expiry or teardown).
    Disconnected,

    /// The link has been down for a prolonged period (20x keep-alive).
    /// Emitted once per continuous outage, for observability only.
    ProlongedOutage,

    /// One complete inbound frame body.
    Frame(Bytes),
}
