/// Errors that can occur while decoding or validating LLC data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlcError {
    /// Fewer bytes were available than the structure needs.
    #[error("truncated data ({available} bytes, need {needed})")]
    Truncated { needed: usize, available: usize },

    /// Stream id outside `0..MAX_STREAMS`.
    #[error("invalid stream id {0}")]
    InvalidStream(u8),

    /// Packet type nibble with no assigned meaning.
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),

    /// The header declares more payload than the frame carries.
    #[error("declared length {declared} exceeds available {available} bytes")]
    LengthMismatch { declared: usize, available: usize },

    /// The payload does not fit the 16-bit length field or the packet limit.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A field holds a value outside its enumeration.
    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u32 },
}

pub type Result<T> = std::result::Result<T, LlcError>;

pub(crate) fn ensure_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        return Err(LlcError::Truncated {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}
