//! Scripted datalink for unit tests: records what is sent and lets a test
//! inject received frames synchronously.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mmagic_datalink::{Datalink, DatalinkError, DatalinkInit, Mmbuf, RxCallback};
use mmagic_llc::{CommandId, LlcHeader, ResponseHeader, Seq, HEADER_SIZE};

#[derive(Clone, Default)]
pub(crate) struct ScriptedLink {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    callback: Mutex<Option<RxCallback>>,
    sent: Mutex<Vec<Bytes>>,
    sent_changed: Condvar,
    fail_tx: AtomicBool,
    fail_alloc: AtomicBool,
    zero_headroom: AtomicBool,
}

impl ScriptedLink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inject(&self, frame: &[u8]) {
        self.deliver(Some(Mmbuf::from_slice(frame)));
    }

    pub(crate) fn inject_null(&self) {
        self.deliver(None);
    }

    fn deliver(&self, buf: Option<Mmbuf>) {
        let callback = self.shared.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(buf);
        }
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.shared.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` frames have been sent.
    pub(crate) fn wait_sent(&self, count: usize) -> Vec<Bytes> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut sent = self.shared.sent.lock().unwrap();
        while sent.len() < count {
            let now = Instant::now();
            assert!(now < deadline, "expected {count} frames, got {}", sent.len());
            sent = self
                .shared
                .sent_changed
                .wait_timeout(sent, deadline - now)
                .unwrap()
                .0;
        }
        sent.clone()
    }

    pub(crate) fn fail_tx(&self, fail: bool) {
        self.shared.fail_tx.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_alloc(&self, fail: bool) {
        self.shared.fail_alloc.store(fail, Ordering::SeqCst);
    }

    /// Hand out TX buffers without the requested header room.
    pub(crate) fn zero_headroom(&self, zero: bool) {
        self.shared.zero_headroom.store(zero, Ordering::SeqCst);
    }
}

impl DatalinkInit for ScriptedLink {
    fn init(self, rx_callback: RxCallback) -> mmagic_datalink::Result<Box<dyn Datalink>> {
        *self.shared.callback.lock().unwrap() = Some(rx_callback);
        Ok(Box::new(ScriptedEnd {
            shared: self.shared,
        }))
    }
}

struct ScriptedEnd {
    shared: Arc<Shared>,
}

impl Datalink for ScriptedEnd {
    fn alloc_buffer_for_tx(&self, header_size: usize, payload_size: usize) -> Option<Mmbuf> {
        if self.shared.fail_alloc.load(Ordering::SeqCst) {
            return None;
        }
        if self.shared.zero_headroom.load(Ordering::SeqCst) {
            return Some(Mmbuf::alloc(0, payload_size));
        }
        Some(Mmbuf::alloc(header_size, payload_size))
    }

    fn tx_buffer(&self, buf: Mmbuf) -> mmagic_datalink::Result<usize> {
        if self.shared.fail_tx.load(Ordering::SeqCst) {
            return Err(DatalinkError::Disconnected);
        }
        let frame = buf.into_bytes();
        let len = frame.len();
        self.shared.sent.lock().unwrap().push(frame);
        self.shared.sent_changed.notify_all();
        Ok(len)
    }

    fn deinit(&self) {
        self.shared.callback.lock().unwrap().take();
    }
}

/// Build a raw frame; fields are not validated.
pub(crate) fn frame(ptype: u8, seq: u8, sid: u8, payload: &[u8]) -> Vec<u8> {
    let header = LlcHeader {
        ptype,
        seq: Seq::from_tseq(seq),
        sid,
        length: payload.len() as u16,
    };
    let mut out = header.encode().to_vec();
    out.extend_from_slice(payload);
    out
}

pub(crate) fn response(seq: u8, sid: u8, id: CommandId, result: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = ResponseHeader { id, result }.encode().to_vec();
    body.extend_from_slice(payload);
    frame(1, seq, sid, &body)
}

/// Decode a frame the endpoint sent.
pub(crate) fn sent_header(frame: &[u8]) -> (LlcHeader, &[u8]) {
    (LlcHeader::decode(frame).unwrap(), &frame[HEADER_SIZE..])
}
