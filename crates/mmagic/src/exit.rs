use std::fmt;
use std::io;

use mmagic_datalink::DatalinkError;
use mmagic_llc::{LlcError, Status};
use mmagic_m2m::M2mError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
/// The agent answered with a non-zero result.
pub const AGENT_ERROR: i32 = 2;
pub const LINK_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
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

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn datalink_error(context: &str, err: DatalinkError) -> CliError {
    match err {
        DatalinkError::Io(source) => io_error(context, source),
        DatalinkError::PacketTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(LINK_ERROR, format!("{context}: {other}")),
    }
}

pub fn llc_error(context: &str, err: LlcError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn m2m_error(context: &str, err: M2mError) -> CliError {
    match err {
        M2mError::Agent(status) => CliError::new(
            AGENT_ERROR,
            format!("{context}: agent returned {status} ({})", status.as_u8()),
        ),
        M2mError::Datalink(err) => datalink_error(context, err),
        M2mError::Llc(err) => llc_error(context, err),
        M2mError::Io(err) => io_error(context, err),
        M2mError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        M2mError::InvalidArg(_) | M2mError::StreamBusy(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        M2mError::NotFound { .. }
        | M2mError::BufferTooSmall { .. }
        | M2mError::ProtocolVersion { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other if other.status() == Status::NotRunning => {
            CliError::new(LINK_ERROR, format!("{context}: {other}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
