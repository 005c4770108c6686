use homelink_frame::FrameError;

/// Errors that can occur in transport operations.
///
/// Connection failures are deliberately absent: the transport absorbs and
/// retries them internally, surfacing only `Disconnected`/`ProlongedOutage`
/// events. Every variant here indicates a caller or configuration bug.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A write was attempted while the link is down.
    #[error("transport not connected")]
    NotConnected,

    /// Frame-level error (oversized body).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// An identifier does not match the transport's configured width.
    #[error("identifier width mismatch (expected {expected} bytes, got {actual})")]
    IdentifierWidth { expected: usize, actual: usize },

    /// Two devices tried to bind the same identifier on one transport.
    #[error("identifier {0} already bound on this transport")]
    DuplicateIdentifier(String),

    /// An aggregated transport needs at least one member.
    #[error("aggregated transport has no members")]
    NoMembers,

    /// Aggregated members must agree on the identifier width.
    #[error("aggregated members disagree on identifier width ({first} vs {other})")]
    MixedIdentifierWidths { first: usize, other: usize },

    /// The transport's supervisor task is gone.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Render an identifier for error messages and logs.
pub(crate) fn ident_hex(ident: &[u8]) -> String {
    let mut out = String::with_capacity(ident.len() * 2);
    for byte in ident {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
