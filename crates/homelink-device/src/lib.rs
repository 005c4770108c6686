//! Request/response/event protocol for homelink devices.
//!
//! Sits directly on a transport's frame stream. The first byte of every
//! frame body (after the optional multiplex identifier) is a call id:
//! `0x00` marks an unsolicited event, `0xFF` a keep-alive acknowledgement,
//! and `0x01..=0xFE` correlate responses with outstanding requests.
//!
//! - [`MessageType`]/[`MessageSet`] — immutable per-type wire descriptors
//!   (head/tail patterns, codecs, timeout, optional event decoding).
//! - [`Device`] — one logical endpoint bound to a transport: allocates call
//!   ids, matches responses and timeouts, dispatches decoded events.
//! - [`Service`] — a named sub-channel of a device, scoped by a
//!   sub-identifier inside the device's payload space.

pub mod device;
pub mod error;
pub mod message;
pub mod service;
pub mod value;

pub use device::{Device, DeviceEvent, EVENT_ID, KEEPALIVE_ID, MAX_PENDING_CALLS};
pub use error::{DeviceError, Result};
pub use message::{raw_codec, MessageSet, MessageType, DEFAULT_CALL_TIMEOUT};
pub use service::{Service, ServiceEvents};
pub use value::{Value, ValueError};
