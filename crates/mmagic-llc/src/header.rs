use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ensure_len, LlcError, Result};
use crate::packet::PacketType;
use crate::seq::Seq;
use crate::stream::StreamId;

/// Size of the LLC header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest LLC frame (header included) either side allocates for.
pub const MAX_PACKET_SIZE: usize = 2048;

/// The fixed LLC header.
///
/// Fields are kept raw so that frames with unknown types or out-of-range
/// stream ids can still be parsed and reported. Use
/// [`LlcHeader::packet_type`] and [`LlcHeader::stream_id`] to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlcHeader {
    pub ptype: u8,
    pub seq: Seq,
    pub sid: u8,
    pub length: u16,
}

impl LlcHeader {
    pub fn new(ptype: PacketType, seq: Seq, sid: StreamId, length: u16) -> Self {
        Self {
            ptype: ptype.as_u8(),
            seq,
            sid: sid.get(),
            length,
        }
    }

    /// Packed type/sequence byte.
    pub fn tseq(&self) -> u8 {
        (self.ptype << 4) | self.seq.get()
    }

    pub fn packet_type(&self) -> Result<PacketType> {
        PacketType::try_from(self.ptype)
    }

    pub fn stream_id(&self) -> Result<StreamId> {
        StreamId::new(self.sid)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = self.length.to_le_bytes();
        [self.tseq(), self.sid, len[0], len[1]]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, HEADER_SIZE)?;
        Ok(Self {
            ptype: data[0] >> 4,
            seq: Seq::from_tseq(data[0]),
            sid: data[1],
            length: u16::from_le_bytes([data[2], data[3]]),
        })
    }
}

/// Build a complete frame: header followed by `payload`.
pub fn encode_frame(ptype: PacketType, seq: Seq, sid: StreamId, payload: &[u8]) -> Result<Bytes> {
    let length = payload_length(payload.len())?;
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&LlcHeader::new(ptype, seq, sid, length).encode());
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Split a frame into its header and the declared payload.
///
/// Bytes past the declared length are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<(LlcHeader, &[u8])> {
    let header = LlcHeader::decode(frame)?;
    let body = &frame[HEADER_SIZE..];
    let declared = usize::from(header.length);
    if declared > body.len() {
        return Err(LlcError::LengthMismatch {
            declared,
            available: body.len(),
        });
    }
    Ok((header, &body[..declared]))
}

/// Check that a payload length fits both the length field and a frame.
pub fn payload_length(len: usize) -> Result<u16> {
    let max = MAX_PACKET_SIZE - HEADER_SIZE;
    if len > max {
        return Err(LlcError::PayloadTooLarge { size: len, max });
    }
    u16::try_from(len).map_err(|_| LlcError::PayloadTooLarge { size: len, max })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(raw: u8) -> Seq {
        Seq::new(raw).unwrap()
    }

    #[test]
    fn tseq_packs_type_and_seq() {
        let header = LlcHeader::new(
            PacketType::Response,
            seq(0x7),
            StreamId::new(3).unwrap(),
            0x0102,
        );
        assert_eq!(header.encode(), [0x17, 3, 0x02, 0x01]);
    }

    #[test]
    fn decode_reads_raw_fields() {
        let header = LlcHeader::decode(&[0xF3, 40, 0x10, 0x00]).unwrap();
        assert_eq!(header.ptype, 0xF);
        assert_eq!(header.seq, seq(3));
        assert_eq!(header.sid, 40);
        assert_eq!(header.length, 16);
        assert_eq!(header.packet_type(), Err(LlcError::UnknownPacketType(0xF)));
        assert_eq!(header.stream_id(), Err(LlcError::InvalidStream(40)));
    }

    #[test]
    fn decode_short_input() {
        assert_eq!(
            LlcHeader::decode(&[0x10, 0x00]),
            Err(LlcError::Truncated {
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(
            PacketType::Event,
            seq(9),
            StreamId::new(0).unwrap(),
            b"abc",
        )
        .unwrap();
        let (header, payload) = decode_frame(&frame).unwrap();
        assert_eq!(header.packet_type(), Ok(PacketType::Event));
        assert_eq!(header.seq, seq(9));
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn declared_length_beyond_data_is_rejected() {
        let err = decode_frame(&[0x10, 0x01, 0x08, 0x00, 1, 2]).unwrap_err();
        assert_eq!(
            err,
            LlcError::LengthMismatch {
                declared: 8,
                available: 2
            }
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let (_, payload) = decode_frame(&[0x10, 0x01, 0x01, 0x00, 7, 8, 9]).unwrap();
        assert_eq!(payload, &[7]);
    }

    #[test]
    fn oversized_payload() {
        assert!(payload_length(MAX_PACKET_SIZE - HEADER_SIZE).is_ok());
        assert!(matches!(
            payload_length(MAX_PACKET_SIZE),
            Err(LlcError::PayloadTooLarge { .. })
        ));
    }
}
