use std::sync::Arc;

use crate::error::Result;
use crate::mmbuf::Mmbuf;

/// Receive callback installed by the LLC.
///
/// Invoked from the datalink's receive context once per received packet.
/// The callback takes ownership of the buffer. `None` signals a receive
/// without a usable buffer (e.g. an allocation failure on the link).
pub type RxCallback = Arc<dyn Fn(Option<Mmbuf>) + Send + Sync>;

/// A running datalink.
pub trait Datalink: Send + Sync {
    /// Allocate a TX buffer with `header_size` bytes of headroom for the
    /// caller's header (plus whatever this link needs for its own framing)
    /// and room for `payload_size` bytes of payload.
    fn alloc_buffer_for_tx(&self, header_size: usize, payload_size: usize) -> Option<Mmbuf>;

    /// Transmit `buf`, taking ownership of it.
    ///
    /// Returns the number of bytes handed to the underlying transport.
    fn tx_buffer(&self, buf: Mmbuf) -> Result<usize>;

    /// Stop the receive context and release transport resources.
    ///
    /// After this returns the rx callback is no longer invoked.
    fn deinit(&self) {}
}

/// A datalink description that can be started once an rx callback exists.
///
/// This splits construction in two so that the layer above can hand in a
/// callback referring back to itself.
pub trait DatalinkInit {
    fn init(self, rx_callback: RxCallback) -> Result<Box<dyn Datalink>>;
}
