use std::fmt;

use homelink_device::DeviceError;
use homelink_transport::TransportError;

// Exit code constants shared by all subcommands.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match err {
        TransportError::NotConnected | TransportError::Shutdown => TRANSPORT_ERROR,
        TransportError::Frame(_) => DATA_INVALID,
        TransportError::IdentifierWidth { .. }
        | TransportError::DuplicateIdentifier(_)
        | TransportError::NoMembers
        | TransportError::MixedIdentifierWidths { .. } => USAGE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Transport(err) => transport_error(context, err),
        DeviceError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        DeviceError::Aborted => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        DeviceError::Decode { .. } | DeviceError::Encode { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        DeviceError::UnknownMessage(_)
        | DeviceError::DuplicateMessage(_)
        | DeviceError::DuplicateEventPattern(_)
        | DeviceError::DuplicateService(_)
        | DeviceError::EmptySubIdentifier => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
