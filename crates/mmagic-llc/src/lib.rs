//! Wire formats of the MMAGIC M2M link-layer-control protocol.
//!
//! Every LLC frame starts with a fixed 4-byte header:
//! - a TSEQ byte packing the packet type (upper nibble) and a 4-bit
//!   sequence number (lower nibble)
//! - a stream id
//! - a 2-byte little-endian payload length
//!
//! COMMAND/RESPONSE/EVENT payloads carry a further 4-byte M2M header.
//! This crate only encodes, decodes and validates; state machines live in
//! `mmagic-m2m`.

pub mod error;
pub mod event;
pub mod header;
pub mod m2m;
pub mod packet;
pub mod seq;
pub mod status;
pub mod stream;
pub mod sync;

pub use error::{LlcError, Result};
pub use event::{BeaconRxArgs, StandbyExitArgs, StandbyExitReason, WlanEvent};
pub use header::{decode_frame, encode_frame, LlcHeader, HEADER_SIZE, MAX_PACKET_SIZE};
pub use m2m::{CommandHeader, CommandId, EventHeader, ResponseHeader, Subsystem, M2M_HEADER_SIZE};
pub use packet::PacketType;
pub use seq::{RxSequencer, Seq, TxSequencer};
pub use status::Status;
pub use stream::{StreamId, CONTROL_STREAM, MAX_STREAMS};
pub use sync::{SyncRequest, SyncResponse, PROTOCOL_VERSION};
