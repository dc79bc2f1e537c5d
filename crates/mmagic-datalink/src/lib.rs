//! Datalink layer for the MMAGIC M2M protocol.
//!
//! The LLC above this crate only needs three things from a transport:
//! - a way to allocate a TX buffer with headroom reserved for its header
//! - a way to hand that buffer over for transmission
//! - an asynchronous callback invoked once per received packet
//!
//! This is the lowest layer. Two implementations are provided: a SLIP
//! framed link over any byte stream (the UART datalink) and an in-memory
//! loopback pair used for tests and demos.

pub mod error;
pub mod loopback;
pub mod mmbuf;
pub mod slip;
pub mod traits;

pub use error::{DatalinkError, Result};
pub use loopback::{pair, LoopbackPort};
pub use mmbuf::Mmbuf;
pub use slip::{SlipConfig, SlipDatalink, SlipPort, SlipRole};
pub use traits::{Datalink, DatalinkInit, RxCallback};
