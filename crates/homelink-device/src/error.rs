use std::time::Duration;

use homelink_transport::TransportError;

use crate::value::ValueError;

/// Errors that can occur in device protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// No message type with this name is configured.
    #[error("unknown message type {0:?}")]
    UnknownMessage(String),

    /// Two message types with the same name in one set.
    #[error("message type {0:?} already registered")]
    DuplicateMessage(String),

    /// Two event-bearing message types share a head/tail pattern.
    #[error("event pattern of {0:?} already claimed by another message type")]
    DuplicateEventPattern(String),

    /// The value could not be encoded for this message type.
    #[error("encoding {name:?} failed: {source}")]
    Encode {
        name: String,
        #[source]
        source: ValueError,
    },

    /// The response payload could not be decoded.
    #[error("decoding {name:?} response failed: {source}")]
    Decode {
        name: String,
        #[source]
        source: ValueError,
    },

    /// No response arrived within the message type's timeout.
    #[error("call {name:?} timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// The transport disconnected while the call was pending.
    #[error("call aborted by disconnection")]
    Aborted,

    /// All 254 call ids are in flight.
    #[error("call id pool exhausted (254 calls pending)")]
    CallsExhausted,

    /// Two services with the same sub-identifier on one device.
    #[error("service {0} already registered on this device")]
    DuplicateService(String),

    /// A service sub-identifier must be at least one byte.
    #[error("service sub-identifier must not be empty")]
    EmptySubIdentifier,

    /// Transport-level error (not connected, identifier binding).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The device's dispatch task is gone.
    #[error("device shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, DeviceError>;
