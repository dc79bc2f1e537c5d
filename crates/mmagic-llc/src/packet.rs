use std::fmt;

use crate::error::LlcError;

/// LLC packet type, carried in the upper nibble of the TSEQ byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Controller to agent command.
    Command = 0,
    /// Agent to controller response to a command.
    Response = 1,
    /// Unsolicited agent to controller notification.
    Event = 2,
    /// The peer could not process a frame.
    Error = 3,
    /// Controller asks the agent to reset.
    AgentReset = 4,
    /// Agent announces that it has (re)started.
    AgentStartNotification = 5,
    /// The frame addressed a stream that is not valid or not open.
    InvalidStream = 8,
    /// The receiver observed a gap in the sequence numbers.
    PacketLossDetected = 9,
    /// Controller asks the agent for its sequence state.
    SyncReq = 10,
    /// Agent answer to [`PacketType::SyncReq`].
    SyncResp = 11,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Command => "COMMAND",
            Self::Response => "RESPONSE",
            Self::Event => "EVENT",
            Self::Error => "ERROR",
            Self::AgentReset => "AGENT_RESET",
            Self::AgentStartNotification => "AGENT_START_NOTIFICATION",
            Self::InvalidStream => "INVALID_STREAM",
            Self::PacketLossDetected => "PACKET_LOSS_DETECTED",
            Self::SyncReq => "SYNC_REQ",
            Self::SyncResp => "SYNC_RESP",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = LlcError;

    fn try_from(value: u8) -> Result<Self, LlcError> {
        Ok(match value {
            0 => Self::Command,
            1 => Self::Response,
            2 => Self::Event,
            3 => Self::Error,
            4 => Self::AgentReset,
            5 => Self::AgentStartNotification,
            8 => Self::InvalidStream,
            9 => Self::PacketLossDetected,
            10 => Self::SyncReq,
            11 => Self::SyncResp,
            other => return Err(LlcError::UnknownPacketType(other)),
        })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_values() {
        assert_eq!(PacketType::Command.as_u8(), 0);
        assert_eq!(PacketType::AgentStartNotification.as_u8(), 5);
        assert_eq!(PacketType::InvalidStream.as_u8(), 8);
        assert_eq!(PacketType::PacketLossDetected.as_u8(), 9);
    }

    #[test]
    fn unassigned_values_are_rejected() {
        for raw in [6u8, 7, 12, 15] {
            assert_eq!(
                PacketType::try_from(raw),
                Err(LlcError::UnknownPacketType(raw))
            );
        }
    }

    #[test]
    fn every_variant_survives_conversion() {
        for raw in 0u8..16 {
            if let Ok(ptype) = PacketType::try_from(raw) {
                assert_eq!(ptype.as_u8(), raw);
            }
        }
    }
}
