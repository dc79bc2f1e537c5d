//! MMAGIC M2M: drive a remote agent over a datalink.
//!
//! A controller sends commands to an agent (typically a Wi-Fi transceiver
//! running on a separate MCU) and receives responses and unsolicited events
//! over a sequenced, stream-multiplexed link layer.
//!
//! # Crate Structure
//!
//! - [`datalink`]: buffers and transports (SLIP over a byte stream, loopback)
//! - [`llc`]: wire formats (LLC header, sequence numbers, M2M headers, status codes)
//! - [`m2m`]: the controller and agent endpoints
//!
//! ```no_run
//! use std::os::unix::net::UnixStream;
//! use mmagic::datalink::SlipPort;
//! use mmagic::llc::{CommandId, StreamId, Subsystem};
//! use mmagic::m2m::{Controller, ControllerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let port = SlipPort::unix(UnixStream::connect("/tmp/mmagic.sock")?)?;
//! let controller = Controller::init(port, ControllerConfig::default())?;
//! controller.wait_for_agent(std::time::Duration::from_secs(1))?;
//!
//! let stream = controller.open_stream(StreamId::new(0)?)?;
//! let version = stream.request(CommandId::new(Subsystem::Sys.into(), 1, 0), &[])?;
//! println!("agent version: {}", String::from_utf8_lossy(&version));
//! # Ok(())
//! # }
//! ```

/// Re-export datalink types.
pub mod datalink {
    pub use mmagic_datalink::*;
}

/// Re-export wire format types.
pub mod llc {
    pub use mmagic_llc::*;
}

/// Re-export controller and agent types.
pub mod m2m {
    pub use mmagic_m2m::*;
}

/// Token accepted by `StreamHandle::request_async` (requires `async` feature).
#[cfg(feature = "async")]
pub use tokio_util::sync::CancellationToken;
