//! Bodies of the SYNC_REQ / SYNC_RESP exchange.
//!
//! The controller uses it to learn the agent's receive sequence state and
//! re-anchor its own transmit sequence, e.g. after a controller restart.

use crate::error::{ensure_len, LlcError, Result};
use crate::seq::Seq;

/// Protocol revision reported in SYNC_RESP.
pub const PROTOCOL_VERSION: u8 = 1;

const NO_SEQ: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub token: u32,
}

impl SyncRequest {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.token.to_le_bytes()
    }

    /// Token 0 is reserved and rejected.
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        let token = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if token == 0 {
            return Err(LlcError::InvalidValue {
                field: "sync token",
                value: 0,
            });
        }
        Ok(Self { token })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResponse {
    pub token: u32,
    /// Last sequence number the agent received, `None` if none yet.
    pub last_seen_seq: Option<Seq>,
    pub protocol_version: u8,
}

impl SyncResponse {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let token = self.token.to_le_bytes();
        [
            token[0],
            token[1],
            token[2],
            token[3],
            self.last_seen_seq.map_or(NO_SEQ, Seq::get),
            self.protocol_version,
        ]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            token: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            last_seen_seq: Seq::new(data[4]),
            protocol_version: data[5],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_rejects_zero_token() {
        assert!(SyncRequest::decode(&[0, 0, 0, 0]).is_err());
        assert!(SyncRequest::decode(&[1, 0]).is_err());
        assert_eq!(
            SyncRequest::decode(&[0x78, 0x56, 0x34, 0x12]).unwrap().token,
            0x1234_5678
        );
    }

    #[test]
    fn response_layout() {
        let rsp = SyncResponse {
            token: 7,
            last_seen_seq: Seq::new(12),
            protocol_version: PROTOCOL_VERSION,
        };
        assert_eq!(rsp.encode(), [7, 0, 0, 0, 12, 1]);
        assert_eq!(SyncResponse::decode(&rsp.encode()).unwrap(), rsp);
    }

    #[test]
    fn response_without_seen_seq() {
        let rsp = SyncResponse {
            token: 1,
            last_seen_seq: None,
            protocol_version: PROTOCOL_VERSION,
        };
        assert_eq!(rsp.encode()[4], 0xFF);
        assert_eq!(SyncResponse::decode(&rsp.encode()).unwrap().last_seen_seq, None);
    }
}
