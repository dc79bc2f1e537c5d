//! Argument structures of the events the controller understands.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ensure_len, LlcError, Result};

/// WLAN subsystem event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WlanEvent {
    BeaconRx = 1,
    StandbyExit = 2,
}

impl TryFrom<u8> for WlanEvent {
    type Error = LlcError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            1 => Ok(Self::BeaconRx),
            2 => Ok(Self::StandbyExit),
            other => Err(LlcError::InvalidValue {
                field: "wlan event",
                value: u32::from(other),
            }),
        }
    }
}

impl From<WlanEvent> for u8 {
    fn from(event: WlanEvent) -> u8 {
        event as u8
    }
}

/// Vendor information elements from a received beacon.
///
/// Never longer than [`BeaconRxArgs::MAX_IE_LEN`]; both constructors enforce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconRxArgs {
    vendor_ies: Bytes,
}

impl BeaconRxArgs {
    /// Largest vendor IE blob an agent reports.
    pub const MAX_IE_LEN: usize = 1536;

    pub fn new(vendor_ies: impl Into<Bytes>) -> Result<Self> {
        let vendor_ies = vendor_ies.into();
        if vendor_ies.len() > Self::MAX_IE_LEN {
            return Err(LlcError::PayloadTooLarge {
                size: vendor_ies.len(),
                max: Self::MAX_IE_LEN,
            });
        }
        Ok(Self { vendor_ies })
    }

    pub fn vendor_ies(&self) -> &Bytes {
        &self.vendor_ies
    }

    /// `len: u16 LE` followed by `len` bytes.
    pub fn encode(&self) -> Bytes {
        const _: () = assert!(BeaconRxArgs::MAX_IE_LEN <= u16::MAX as usize);
        let len = self.vendor_ies.len().min(Self::MAX_IE_LEN);
        let mut out = BytesMut::with_capacity(2 + len);
        out.put_u16_le(len as u16);
        out.put_slice(&self.vendor_ies[..len]);
        out.freeze()
    }

    /// Decode the args. Padding after the declared length is ignored, so
    /// both the compact form and the fixed-size 1538-byte form are accepted.
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, 2)?;
        let len = usize::from(u16::from_le_bytes([data[0], data[1]]));
        if len > Self::MAX_IE_LEN {
            return Err(LlcError::PayloadTooLarge {
                size: len,
                max: Self::MAX_IE_LEN,
            });
        }
        ensure_len(data, 2 + len)?;
        Ok(Self {
            vendor_ies: Bytes::copy_from_slice(&data[2..2 + len]),
        })
    }
}

/// Why the agent left standby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StandbyExitReason {
    None = 0,
    WakeupFrame = 1,
    Associate = 2,
    ExtInput = 3,
    WhitelistPkt = 4,
    TcpConnectionLost = 5,
}

impl TryFrom<u32> for StandbyExitReason {
    type Error = LlcError;

    fn try_from(raw: u32) -> Result<Self> {
        Ok(match raw {
            0 => Self::None,
            1 => Self::WakeupFrame,
            2 => Self::Associate,
            3 => Self::ExtInput,
            4 => Self::WhitelistPkt,
            5 => Self::TcpConnectionLost,
            value => {
                return Err(LlcError::InvalidValue {
                    field: "standby exit reason",
                    value,
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandbyExitArgs {
    pub reason: StandbyExitReason,
}

impl StandbyExitArgs {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        (self.reason as u32).to_le_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        let raw = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        Ok(Self {
            reason: StandbyExitReason::try_from(raw)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_args_layout() {
        let args = BeaconRxArgs::new(&b"\xdd\x03abc"[..]).unwrap();
        assert_eq!(args.encode().as_ref(), b"\x05\x00\xdd\x03abc");
    }

    #[test]
    fn beacon_args_accept_fixed_size_form() {
        let mut fixed = vec![0u8; 2 + BeaconRxArgs::MAX_IE_LEN];
        fixed[0] = 3;
        fixed[2..5].copy_from_slice(b"xyz");
        let args = BeaconRxArgs::decode(&fixed).unwrap();
        assert_eq!(args.vendor_ies().as_ref(), b"xyz");
    }

    #[test]
    fn beacon_args_reject_bad_length() {
        assert!(matches!(
            BeaconRxArgs::decode(&[4, 0, 1, 2]),
            Err(LlcError::Truncated { needed: 6, .. })
        ));
        assert!(matches!(
            BeaconRxArgs::decode(&[0x01, 0x06]),
            Err(LlcError::PayloadTooLarge { .. })
        ));
        assert!(BeaconRxArgs::new(vec![0u8; 1537]).is_err());
    }

    #[test]
    fn beacon_args_reject_length_past_u16() {
        let err = BeaconRxArgs::new(vec![0u8; 70_000]).unwrap_err();
        assert!(matches!(
            err,
            LlcError::PayloadTooLarge {
                size: 70_000,
                max: BeaconRxArgs::MAX_IE_LEN
            }
        ));
    }

    #[test]
    fn beacon_args_encode_declares_full_length() {
        let args = BeaconRxArgs::new(vec![0xAB; BeaconRxArgs::MAX_IE_LEN]).unwrap();
        let wire = args.encode();
        assert_eq!(wire.len(), 2 + BeaconRxArgs::MAX_IE_LEN);
        assert_eq!(
            usize::from(u16::from_le_bytes([wire[0], wire[1]])),
            BeaconRxArgs::MAX_IE_LEN
        );
        assert_eq!(BeaconRxArgs::decode(&wire).unwrap(), args);
    }

    #[test]
    fn standby_exit_reason() {
        let args = StandbyExitArgs::decode(&[5, 0, 0, 0]).unwrap();
        assert_eq!(args.reason, StandbyExitReason::TcpConnectionLost);
        assert_eq!(args.encode(), [5, 0, 0, 0]);
        assert!(StandbyExitArgs::decode(&[6, 0, 0, 0]).is_err());
        assert!(StandbyExitArgs::decode(&[1, 0]).is_err());
    }
}
