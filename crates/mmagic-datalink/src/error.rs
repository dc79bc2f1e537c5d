/// Errors that can occur in datalink operations.
#[derive(Debug, thiserror::Error)]
pub enum DatalinkError {
    /// Not enough headroom at the start of a buffer to prepend a header.
    #[error("insufficient headroom ({available} bytes, need {needed})")]
    InsufficientHeadroom { needed: usize, available: usize },

    /// The packet exceeds the configured maximum size.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// A SLIP escape byte was followed by something other than ESC_END/ESC_ESC.
    #[error("invalid SLIP escape sequence (0x{0:02x})")]
    InvalidEscape(u8),

    /// An I/O error occurred on the underlying byte stream.
    #[error("datalink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The other end of the link has gone away.
    #[error("datalink disconnected")]
    Disconnected,

    /// The datalink has been shut down.
    #[error("datalink shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, DatalinkError>;
