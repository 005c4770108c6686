use std::time::Duration;

use homelink_frame::{PreambleWidth, DEFAULT_MAX_FRAME_LEN};

/// Default application keep-alive cadence.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_millis(2000);

/// Read-silence budget before the link is declared dead, as a multiple of
/// the keep-alive interval.
pub const READ_LIVENESS_FACTOR: u32 = 4;

/// Budget for completing a started frame, as a multiple of keep-alive.
pub const PARTIAL_FRAME_FACTOR: u32 = 2;

/// Continuous-outage duration before `ProlongedOutage` fires, as a
/// multiple of keep-alive.
pub const PROLONGED_OUTAGE_FACTOR: u32 = 20;

/// Construction parameters for one physical endpoint.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Target `host:port`.
    pub addr: String,
    /// Width of the length preamble on both read and write side.
    pub preamble: PreambleWidth,
    /// Keep-alive cadence; every other timer is derived from it.
    pub keep_alive: Duration,
    /// How long a fresh connection must hold before `StableConnected`.
    pub stable_debounce: Duration,
    /// Multiplex identifier width in bytes; 0 means the transport carries
    /// exactly one implicit device.
    pub identifier_len: usize,
    /// Upper bound on inbound frame bodies.
    pub max_frame_len: usize,
}

impl TransportConfig {
    /// Config with defaults for the given target address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            preamble: PreambleWidth::U8,
            keep_alive: DEFAULT_KEEP_ALIVE,
            stable_debounce: DEFAULT_KEEP_ALIVE,
            identifier_len: 0,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Interval of the reconciliation tick that drives actual state
    /// toward desired state.
    pub fn reconcile_interval(&self) -> Duration {
        self.keep_alive / 2
    }

    /// Read-silence deadline: no parsed frame for this long kills the link
    /// even when the OS still considers the socket healthy.
    pub fn read_liveness(&self) -> Duration {
        self.keep_alive * READ_LIVENESS_FACTOR
    }

    /// Stalled-frame deadline: a started frame must complete within this.
    pub fn partial_frame(&self) -> Duration {
        self.keep_alive * PARTIAL_FRAME_FACTOR
    }

    /// Continuous-outage duration after which `ProlongedOutage` fires.
    pub fn prolonged_outage(&self) -> Duration {
        self.keep_alive * PROLONGED_OUTAGE_FACTOR
    }
}
