//! In-memory datalink pair.
//!
//! Each end delivers what the other end transmits to its own rx callback,
//! from a dedicated receive thread, so the LLC sees the same threading
//! shape as with a real transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{DatalinkError, Result};
use crate::mmbuf::Mmbuf;
use crate::traits::{Datalink, DatalinkInit, RxCallback};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One end of a loopback pair, not yet started.
pub struct LoopbackPort {
    inbound: Receiver<Bytes>,
    outbound: Sender<Bytes>,
}

/// Create two connected loopback ends.
pub fn pair() -> (LoopbackPort, LoopbackPort) {
    let (to_a, from_b) = mpsc::channel();
    let (to_b, from_a) = mpsc::channel();
    (
        LoopbackPort {
            inbound: from_b,
            outbound: to_b,
        },
        LoopbackPort {
            inbound: from_a,
            outbound: to_a,
        },
    )
}

impl DatalinkInit for LoopbackPort {
    fn init(self, rx_callback: RxCallback) -> Result<Box<dyn Datalink>> {
        let running = Arc::new(AtomicBool::new(true));
        let inbound = self.inbound;
        let rx_thread = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("mmagic-loopback-rx".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        match inbound.recv_timeout(POLL_INTERVAL) {
                            Ok(packet) => rx_callback(Some(Mmbuf::from_slice(&packet))),
                            Err(RecvTimeoutError::Timeout) => continue,
                            Err(RecvTimeoutError::Disconnected) => {
                                debug!("loopback peer went away");
                                break;
                            }
                        }
                    }
                })?
        };

        Ok(Box::new(LoopbackLink {
            outbound: Mutex::new(Some(self.outbound)),
            running,
            rx_thread: Mutex::new(Some(rx_thread)),
        }))
    }
}

/// A running loopback end.
pub struct LoopbackLink {
    outbound: Mutex<Option<Sender<Bytes>>>,
    running: Arc<AtomicBool>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Datalink for LoopbackLink {
    fn alloc_buffer_for_tx(&self, header_size: usize, payload_size: usize) -> Option<Mmbuf> {
        Some(Mmbuf::alloc(header_size, payload_size))
    }

    fn tx_buffer(&self, buf: Mmbuf) -> Result<usize> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let Some(outbound) = outbound.as_ref() else {
            return Err(DatalinkError::Shutdown);
        };
        let packet = buf.into_bytes();
        let len = packet.len();
        outbound
            .send(packet)
            .map_err(|_| DatalinkError::Disconnected)?;
        Ok(len)
    }

    fn deinit(&self) {
        self.running.store(false, Ordering::Release);
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let handle = self
            .rx_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.deinit();
    }
}
