use std::time::Duration;

use mmagic_datalink::DatalinkError;
use mmagic_llc::{CommandId, LlcError, Status, StreamId};

/// Errors surfaced by the controller and agent APIs.
#[derive(Debug, thiserror::Error)]
pub enum M2mError {
    /// The agent answered with a non-zero result byte.
    #[error("agent returned {0}")]
    Agent(Status),

    /// The queued response belongs to a different command.
    #[error("response for {got} while waiting for {expected}")]
    NotFound { expected: CommandId, got: CommandId },

    /// Wire data could not be decoded, or a stream id was out of range.
    #[error(transparent)]
    Llc(#[from] LlcError),

    /// The response payload does not fit the caller's buffer.
    #[error("response payload of {size} bytes exceeds buffer of {capacity} bytes")]
    BufferTooSmall { size: usize, capacity: usize },

    /// The datalink could not provide a TX buffer.
    #[error("datalink could not allocate a tx buffer")]
    NoMem,

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// The datalink failed to start or to transmit.
    #[error("datalink error: {0}")]
    Datalink(#[from] DatalinkError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The wait was released by [`crate::Controller::cancel`] or a token.
    #[error("request cancelled")]
    Cancelled,

    /// Another [`crate::StreamHandle`] holds the stream.
    #[error("stream {0} is already in use")]
    StreamBusy(StreamId),

    #[error("stream {0} is closed")]
    StreamClosed(StreamId),

    /// No stream slot left to open.
    #[error("no free stream")]
    NoFreeStream,

    /// The peer speaks a protocol revision this side does not.
    #[error("agent speaks protocol version {got}, expected {expected}")]
    ProtocolVersion { expected: u8, got: u8 },

    /// The endpoint has been shut down.
    #[error("endpoint is shut down")]
    Shutdown,

    /// A background task running the request failed.
    #[error("request task failed: {0}")]
    Task(String),

    /// A worker thread could not be started.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl M2mError {
    /// Map onto the closed status taxonomy used on the wire.
    pub fn status(&self) -> Status {
        match self {
            Self::Agent(status) => *status,
            Self::NotFound { .. } => Status::NotFound,
            Self::Llc(LlcError::InvalidStream(_)) => Status::InvalidStream,
            Self::Llc(_) | Self::BufferTooSmall { .. } | Self::Task(_) | Self::Io(_) => {
                Status::Error
            }
            Self::NoMem => Status::NoMem,
            Self::InvalidArg(_) => Status::InvalidArg,
            Self::Datalink(_) => Status::TxError,
            Self::Timeout(_) => Status::Timeout,
            Self::Cancelled | Self::StreamClosed(_) => Status::Closed,
            Self::StreamBusy(_) | Self::NoFreeStream => Status::Unavailable,
            Self::ProtocolVersion { .. } => Status::NotSupported,
            Self::Shutdown => Status::NotRunning,
        }
    }
}

pub type Result<T> = std::result::Result<T, M2mError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(M2mError::Agent(Status::Unavailable).status(), Status::Unavailable);
        assert_eq!(
            M2mError::Llc(LlcError::InvalidStream(40)).status(),
            Status::InvalidStream
        );
        assert_eq!(
            M2mError::Llc(LlcError::Truncated {
                needed: 4,
                available: 1
            })
            .status(),
            Status::Error
        );
        assert_eq!(
            M2mError::Datalink(DatalinkError::Disconnected).status(),
            Status::TxError
        );
        assert_eq!(
            M2mError::Timeout(Duration::from_secs(1)).status(),
            Status::Timeout
        );
    }

    #[test]
    fn agent_error_display() {
        let err = M2mError::Agent(Status::Unavailable);
        assert_eq!(err.to_string(), "agent returned UNAVAILABLE");
    }
}
