use std::fmt;

/// Status codes shared by the controller API and the RESPONSE result byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error = 1,
    InvalidArg = 2,
    Unavailable = 3,
    Timeout = 4,
    InvalidStream = 5,
    NotFound = 6,
    NotSupported = 7,
    TxError = 8,
    NoMem = 9,
    Closed = 10,
    ChannelListNotSet = 11,
    ShutdownBlocked = 12,
    ChannelInvalid = 13,
    NotRunning = 14,
    NoLink = 15,
    UnknownHost = 16,
    SocketFailed = 17,
    SocketConnectFailed = 18,
    SocketBindFailed = 19,
    SocketListenFailed = 20,
}

impl Status {
    const ALL: [Status; 21] = [
        Self::Ok,
        Self::Error,
        Self::InvalidArg,
        Self::Unavailable,
        Self::Timeout,
        Self::InvalidStream,
        Self::NotFound,
        Self::NotSupported,
        Self::TxError,
        Self::NoMem,
        Self::Closed,
        Self::ChannelListNotSet,
        Self::ShutdownBlocked,
        Self::ChannelInvalid,
        Self::NotRunning,
        Self::NoLink,
        Self::UnknownHost,
        Self::SocketFailed,
        Self::SocketConnectFailed,
        Self::SocketBindFailed,
        Self::SocketListenFailed,
    ];

    /// Map a result byte to a status. Unrecognized values become `Error`.
    pub fn from_u8(raw: u8) -> Self {
        Self::ALL
            .get(usize::from(raw))
            .copied()
            .unwrap_or(Self::Error)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::InvalidArg => "INVALID_ARG",
            Self::Unavailable => "UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::InvalidStream => "INVALID_STREAM",
            Self::NotFound => "NOT_FOUND",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::TxError => "TX_ERROR",
            Self::NoMem => "NO_MEM",
            Self::Closed => "CLOSED",
            Self::ChannelListNotSet => "CHANNEL_LIST_NOT_SET",
            Self::ShutdownBlocked => "SHUTDOWN_BLOCKED",
            Self::ChannelInvalid => "CHANNEL_INVALID",
            Self::NotRunning => "NOT_RUNNING",
            Self::NoLink => "NO_LINK",
            Self::UnknownHost => "UNKNOWN_HOST",
            Self::SocketFailed => "SOCKET_FAILED",
            Self::SocketConnectFailed => "SOCKET_CONNECT_FAILED",
            Self::SocketBindFailed => "SOCKET_BIND_FAILED",
            Self::SocketListenFailed => "SOCKET_LISTEN_FAILED",
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status.as_u8()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_values() {
        for (i, status) in Status::ALL.iter().enumerate() {
            assert_eq!(usize::from(status.as_u8()), i);
            assert_eq!(Status::from_u8(i as u8), *status);
        }
    }

    #[test]
    fn unknown_codes_map_to_error() {
        assert_eq!(Status::from_u8(21), Status::Error);
        assert_eq!(Status::from_u8(0xFF), Status::Error);
    }

    #[test]
    fn names() {
        assert_eq!(Status::SocketListenFailed.to_string(), "SOCKET_LISTEN_FAILED");
        assert!(Status::Ok.is_ok());
        assert!(!Status::Timeout.is_ok());
    }
}
