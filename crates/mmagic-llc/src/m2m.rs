//! Payload-level headers carried inside COMMAND, RESPONSE and EVENT frames.

use std::fmt;

use crate::error::{ensure_len, LlcError, Result};
use crate::status::Status;

/// Size of every M2M header in bytes.
pub const M2M_HEADER_SIZE: usize = 4;

/// Subsystems addressed by commands and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Subsystem {
    Wlan = 1,
    Ip = 2,
    Ping = 3,
    Iperf = 4,
    Sys = 5,
    Tcp = 6,
}

impl Subsystem {
    pub fn name(self) -> &'static str {
        match self {
            Self::Wlan => "wlan",
            Self::Ip => "ip",
            Self::Ping => "ping",
            Self::Iperf => "iperf",
            Self::Sys => "sys",
            Self::Tcp => "tcp",
        }
    }
}

impl TryFrom<u8> for Subsystem {
    type Error = LlcError;

    fn try_from(raw: u8) -> Result<Self> {
        Ok(match raw {
            1 => Self::Wlan,
            2 => Self::Ip,
            3 => Self::Ping,
            4 => Self::Iperf,
            5 => Self::Sys,
            6 => Self::Tcp,
            other => {
                return Err(LlcError::InvalidValue {
                    field: "subsystem",
                    value: u32::from(other),
                })
            }
        })
    }
}

impl From<Subsystem> for u8 {
    fn from(subsystem: Subsystem) -> u8 {
        subsystem as u8
    }
}

/// The (subsystem, command, subcommand) triple naming one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId {
    pub subsystem: u8,
    pub command: u8,
    pub subcommand: u8,
}

impl CommandId {
    pub fn new(subsystem: u8, command: u8, subcommand: u8) -> Self {
        Self {
            subsystem,
            command,
            subcommand,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subsystem, self.command, self.subcommand)
    }
}

/// Header of a COMMAND payload: triple plus one reserved byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub id: CommandId,
}

impl CommandHeader {
    pub fn new(id: CommandId) -> Self {
        Self { id }
    }

    pub fn encode(&self) -> [u8; M2M_HEADER_SIZE] {
        [self.id.subsystem, self.id.command, self.id.subcommand, 0]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, M2M_HEADER_SIZE)?;
        Ok(Self {
            id: CommandId::new(data[0], data[1], data[2]),
        })
    }
}

/// Header of a RESPONSE payload: triple plus the result byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub id: CommandId,
    pub result: u8,
}

impl ResponseHeader {
    pub fn new(id: CommandId, status: Status) -> Self {
        Self {
            id,
            result: status.as_u8(),
        }
    }

    /// The result byte mapped through the status table.
    pub fn status(&self) -> Status {
        Status::from_u8(self.result)
    }

    pub fn encode(&self) -> [u8; M2M_HEADER_SIZE] {
        [
            self.id.subsystem,
            self.id.command,
            self.id.subcommand,
            self.result,
        ]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, M2M_HEADER_SIZE)?;
        Ok(Self {
            id: CommandId::new(data[0], data[1], data[2]),
            result: data[3],
        })
    }
}

/// Header of an EVENT payload: subsystem and event id, two reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub subsystem: u8,
    pub event: u8,
}

impl EventHeader {
    pub fn new(subsystem: u8, event: u8) -> Self {
        Self { subsystem, event }
    }

    pub fn encode(&self) -> [u8; M2M_HEADER_SIZE] {
        [self.subsystem, self.event, 0, 0]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, M2M_HEADER_SIZE)?;
        Ok(Self {
            subsystem: data[0],
            event: data[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_header_layout() {
        let header = CommandHeader::new(CommandId::new(Subsystem::Wlan.into(), 5, 0));
        assert_eq!(header.encode(), [1, 5, 0, 0]);
        assert_eq!(CommandHeader::decode(&[1, 5, 0, 0xAA]).unwrap(), header);
    }

    #[test]
    fn response_result_maps_to_status() {
        let header = ResponseHeader::decode(&[1, 5, 0, 4]).unwrap();
        assert_eq!(header.status(), Status::Timeout);
        assert_eq!(header.id, CommandId::new(1, 5, 0));

        let header = ResponseHeader::decode(&[1, 5, 0, 200]).unwrap();
        assert_eq!(header.status(), Status::Error);
    }

    #[test]
    fn event_header_ignores_reserved() {
        let header = EventHeader::decode(&[1, 2, 0xFF, 0xFF, 9]).unwrap();
        assert_eq!(header, EventHeader::new(Subsystem::Wlan.into(), 2));
        assert_eq!(header.encode(), [1, 2, 0, 0]);
    }

    #[test]
    fn short_headers() {
        assert!(matches!(
            ResponseHeader::decode(&[1, 2, 3]),
            Err(LlcError::Truncated { needed: 4, .. })
        ));
        assert!(EventHeader::decode(&[]).is_err());
    }

    #[test]
    fn subsystem_ids() {
        assert_eq!(u8::from(Subsystem::Tcp), 6);
        assert_eq!(Subsystem::try_from(5).unwrap(), Subsystem::Sys);
        assert!(Subsystem::try_from(0).is_err());
    }
}
