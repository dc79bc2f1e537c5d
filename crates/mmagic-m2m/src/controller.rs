//! Controller end of the link.
//!
//! The controller owns the datalink, the per-stream response slots and the
//! sequence state of both directions. Its receive path runs on the
//! datalink's receive thread:
//!
//! 1. strip and validate the LLC header (short frames, bad stream ids and
//!    bad lengths are dropped without touching sequence state)
//! 2. drop repeats of the last sequence number, except agent start
//!    notifications
//! 3. dispatch by packet type
//! 4. report a gap if the sequence number skipped ahead
//! 5. remember the sequence number

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use mmagic_datalink::{Datalink, DatalinkInit, Mmbuf, RxCallback};
use mmagic_llc::header::payload_length;
use mmagic_llc::{
    BeaconRxArgs, CommandHeader, CommandId, LlcError, LlcHeader, PacketType, ResponseHeader,
    RxSequencer, Seq, StandbyExitArgs, StreamId, SyncRequest, SyncResponse, TxSequencer,
    CONTROL_STREAM, HEADER_SIZE, M2M_HEADER_SIZE, MAX_STREAMS, PROTOCOL_VERSION,
};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::{M2mError, Result};
use crate::events::EventHandlers;
use crate::slot::{PopError, StreamSlot};
use crate::stats::{LinkCounters, LinkStats};
use crate::stream::StreamHandle;

/// Controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// How long [`Controller::rx`] waits for a response. `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// How long [`Controller::sync`] waits for the agent's answer.
    pub sync_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            response_timeout: None,
            sync_timeout: Duration::from_secs(1),
        }
    }
}

/// Restart handshake state as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// No start notification since init or since the last reset request.
    AwaitingAgent,
    /// At least one start notification has arrived.
    AgentReady,
}

/// Invoked on every agent start notification.
pub type AgentStartCallback = Arc<dyn Fn(&Controller) + Send + Sync>;

/// Handle to a running controller. Clones share the same link.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Handshake {
    state: AgentState,
    starts: u64,
}

struct Inner {
    config: ControllerConfig,
    datalink: OnceLock<Box<dyn Datalink>>,
    running: AtomicBool,
    /// Serializes every transmission and guards the TX sequence number.
    tx_seq: Mutex<TxSequencer>,
    rx_seq: Mutex<RxSequencer>,
    streams: Vec<StreamSlot<Mmbuf>>,
    checked_out: Mutex<[bool; MAX_STREAMS]>,
    events: EventHandlers,
    start_callback: RwLock<Option<AgentStartCallback>>,
    handshake: Mutex<Handshake>,
    handshake_changed: Condvar,
    sync_lock: Mutex<()>,
    sync_slot: StreamSlot<SyncResponse>,
    pending_token: AtomicU32,
    next_token: AtomicU32,
    counters: LinkCounters,
}

impl Controller {
    /// Start the datalink and begin receiving.
    pub fn init<L: DatalinkInit>(link: L, config: ControllerConfig) -> Result<Self> {
        let inner = Arc::new(Inner {
            config,
            datalink: OnceLock::new(),
            running: AtomicBool::new(true),
            tx_seq: Mutex::new(TxSequencer::new()),
            rx_seq: Mutex::new(RxSequencer::new()),
            streams: (0..MAX_STREAMS).map(|_| StreamSlot::new()).collect(),
            checked_out: Mutex::new([false; MAX_STREAMS]),
            events: EventHandlers::default(),
            start_callback: RwLock::new(None),
            handshake: Mutex::new(Handshake {
                state: AgentState::AwaitingAgent,
                starts: 0,
            }),
            handshake_changed: Condvar::new(),
            sync_lock: Mutex::new(()),
            sync_slot: StreamSlot::new(),
            pending_token: AtomicU32::new(0),
            next_token: AtomicU32::new(token_seed()),
            counters: LinkCounters::default(),
        });

        let weak = Arc::downgrade(&inner);
        let callback: RxCallback = Arc::new(move |buf: Option<Mmbuf>| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(buf);
            }
        });
        let datalink = link.init(callback)?;
        let _ = inner.datalink.set(datalink);

        info!("controller started");
        Ok(Self { inner })
    }

    /// Stop the link. Blocked waiters are released with an error and later
    /// calls fail with [`M2mError::Shutdown`].
    pub fn deinit(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for slot in &self.inner.streams {
            slot.close();
        }
        self.inner.sync_slot.close();
        {
            let _handshake = self.inner.lock_handshake();
            self.inner.handshake_changed.notify_all();
        }
        if let Some(datalink) = self.inner.datalink.get() {
            datalink.deinit();
        }
        info!("controller stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> LinkStats {
        self.inner.counters.snapshot()
    }

    /// Send a COMMAND frame on `stream`.
    pub fn tx(&self, stream: StreamId, command: CommandId, payload: &[u8]) -> Result<()> {
        let datalink = self.inner.datalink()?;
        let mut buf = datalink
            .alloc_buffer_for_tx(HEADER_SIZE, M2M_HEADER_SIZE + payload.len())
            .ok_or(M2mError::NoMem)?;
        buf.append_data(&CommandHeader::new(command).encode());
        buf.append_data(payload);

        let mut tx_seq = self.inner.lock_tx();
        let seq = tx_seq.advance();
        self.inner
            .send_frame(datalink, PacketType::Command, seq, stream, buf)
    }

    /// Wait for the response to `expected` on `stream` and copy its payload
    /// into `out`, returning the payload length.
    ///
    /// Waits up to [`ControllerConfig::response_timeout`]. `out` is left
    /// untouched on every error.
    pub fn rx(&self, stream: StreamId, expected: CommandId, out: &mut [u8]) -> Result<usize> {
        self.rx_timeout(stream, expected, out, self.inner.config.response_timeout)
    }

    /// [`Controller::rx`] with an explicit timeout (`None` waits forever).
    pub fn rx_timeout(
        &self,
        stream: StreamId,
        expected: CommandId,
        out: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let payload = self
            .inner
            .take_response(stream, expected, Some(out.len()), timeout)?;
        let data = payload.data();
        out[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    /// Like [`Controller::rx_timeout`] but returns the payload, whatever
    /// its size.
    pub fn rx_bytes(
        &self,
        stream: StreamId,
        expected: CommandId,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        self.inner
            .take_response(stream, expected, None, timeout)
            .map(Mmbuf::into_bytes)
    }

    /// Release a thread blocked waiting for a response on `stream`.
    pub fn cancel(&self, stream: StreamId) {
        debug!(sid = %stream, "cancelling response wait");
        self.inner.streams[stream.index()].cancel();
    }

    /// Drop a response that arrived after its waiter gave up.
    pub fn discard_pending(&self, stream: StreamId) {
        if self.inner.streams[stream.index()].clear().is_some() {
            debug!(sid = %stream, "stale response discarded");
        }
    }

    /// Check `stream` out for exclusive use.
    pub fn open_stream(&self, stream: StreamId) -> Result<StreamHandle> {
        let mut taken = self
            .inner
            .checked_out
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if taken[stream.index()] {
            return Err(M2mError::StreamBusy(stream));
        }
        taken[stream.index()] = true;
        Ok(StreamHandle::new(self.clone(), stream))
    }

    pub(crate) fn release_stream(&self, stream: StreamId) {
        self.inner
            .checked_out
            .lock()
            .unwrap_or_else(|e| e.into_inner())[stream.index()] = false;
    }

    pub fn register_wlan_beacon_rx_handler<F>(&self, handler: F)
    where
        F: Fn(&BeaconRxArgs) + Send + Sync + 'static,
    {
        self.inner.events.set_beacon_rx(Some(Arc::new(handler)));
    }

    pub fn register_wlan_standby_exit_handler<F>(&self, handler: F)
    where
        F: Fn(&StandbyExitArgs) + Send + Sync + 'static,
    {
        self.inner.events.set_standby_exit(Some(Arc::new(handler)));
    }

    /// Remove both WLAN event handlers.
    pub fn clear_event_handlers(&self) {
        self.inner.events.set_beacon_rx(None);
        self.inner.events.set_standby_exit(None);
    }

    /// Run `callback` on every agent start notification, repeats included.
    pub fn register_agent_start_callback<F>(&self, callback: F)
    where
        F: Fn(&Controller) + Send + Sync + 'static,
    {
        *self
            .inner
            .start_callback
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    pub fn agent_state(&self) -> AgentState {
        self.inner.lock_handshake().state
    }

    /// Number of start notifications received since init.
    pub fn agent_start_count(&self) -> u64 {
        self.inner.lock_handshake().starts
    }

    /// Block until the agent has announced itself.
    pub fn wait_for_agent(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut handshake = self.inner.lock_handshake();
        loop {
            if handshake.state == AgentState::AgentReady {
                return Ok(());
            }
            if !self.is_running() {
                return Err(M2mError::Shutdown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(M2mError::Timeout(timeout));
            }
            handshake = self
                .inner
                .handshake_changed
                .wait_timeout(handshake, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Ask the agent to reset. The handshake returns to
    /// [`AgentState::AwaitingAgent`] until the agent announces itself again.
    pub fn reset_agent(&self) -> Result<()> {
        let datalink = self.inner.datalink()?;
        let buf = datalink
            .alloc_buffer_for_tx(HEADER_SIZE, 0)
            .ok_or(M2mError::NoMem)?;

        let mut tx_seq = self.inner.lock_tx();
        let seq = tx_seq.advance();
        // Flip the state before the frame leaves so a fast START is not lost.
        let previous = std::mem::replace(
            &mut self.inner.lock_handshake().state,
            AgentState::AwaitingAgent,
        );
        info!("requesting agent reset");
        let sent = self
            .inner
            .send_frame(datalink, PacketType::AgentReset, seq, CONTROL_STREAM, buf);
        if sent.is_err() {
            let mut handshake = self.inner.lock_handshake();
            if handshake.state == AgentState::AwaitingAgent {
                handshake.state = previous;
            }
        }
        sent
    }

    /// Synchronize sequence state with the agent, waiting up to
    /// [`ControllerConfig::sync_timeout`].
    pub fn sync(&self) -> Result<SyncResponse> {
        self.sync_timeout(self.inner.config.sync_timeout)
    }

    /// Send SYNC_REQ re-using the last sent sequence number and wait for the
    /// matching SYNC_RESP.
    ///
    /// The agent accepts SYNC_REQ even as a repeat and records its sequence
    /// number, so afterwards the next command follows on without a repeat
    /// or a gap on the agent side. The returned response carries the
    /// agent's sequence state from before the exchange.
    pub fn sync_timeout(&self, timeout: Duration) -> Result<SyncResponse> {
        let _sync = self
            .inner
            .sync_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let datalink = self.inner.datalink()?;

        let request = SyncRequest {
            token: self.inner.new_token(),
        };
        let mut buf = datalink
            .alloc_buffer_for_tx(HEADER_SIZE, SyncRequest::SIZE)
            .ok_or(M2mError::NoMem)?;
        buf.append_data(&request.encode());

        self.inner.sync_slot.clear();
        self.inner
            .pending_token
            .store(request.token, Ordering::Release);

        let result = self
            .send_sync_request(datalink, buf, request.token)
            .and_then(|seq| {
                let response = self
                    .inner
                    .sync_slot
                    .pop(Some(timeout))
                    .map_err(|err| self.inner.pop_error(CONTROL_STREAM, err))?;
                if response.protocol_version != PROTOCOL_VERSION {
                    return Err(M2mError::ProtocolVersion {
                        expected: PROTOCOL_VERSION,
                        got: response.protocol_version,
                    });
                }
                info!(
                    seq = %seq,
                    agent_last_seen = ?response.last_seen_seq.map(Seq::get),
                    "link synchronized"
                );
                Ok(response)
            });

        self.inner.pending_token.store(0, Ordering::Release);
        result
    }

    fn send_sync_request(&self, datalink: &dyn Datalink, buf: Mmbuf, token: u32) -> Result<Seq> {
        let mut tx_seq = self.inner.lock_tx();
        let seq = tx_seq.last_sent().unwrap_or(Seq::ZERO);
        tx_seq.commit(seq);
        debug!(seq = %seq, token, "sending sync request");
        self.inner
            .send_frame(datalink, PacketType::SyncReq, seq, CONTROL_STREAM, buf)?;
        Ok(seq)
    }
}

impl Inner {
    fn datalink(&self) -> Result<&dyn Datalink> {
        if !self.running.load(Ordering::Acquire) {
            return Err(M2mError::Shutdown);
        }
        self.datalink
            .get()
            .map(|datalink| datalink.as_ref())
            .ok_or(M2mError::Shutdown)
    }

    fn lock_tx(&self) -> MutexGuard<'_, TxSequencer> {
        self.tx_seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_rx(&self) -> MutexGuard<'_, RxSequencer> {
        self.rx_seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_handshake(&self) -> MutexGuard<'_, Handshake> {
        self.handshake.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_token(&self) -> u32 {
        loop {
            let token = self.next_token.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if token != 0 {
                return token;
            }
        }
    }

    /// Prepend the LLC header and transmit. Callers hold the TX lock.
    fn send_frame(
        &self,
        datalink: &dyn Datalink,
        ptype: PacketType,
        seq: Seq,
        sid: StreamId,
        mut buf: Mmbuf,
    ) -> Result<()> {
        let length =
            payload_length(buf.data_len()).map_err(|err| M2mError::InvalidArg(err.to_string()))?;
        buf.prepend_data(&LlcHeader::new(ptype, seq, sid, length).encode())
            .map_err(|err| M2mError::InvalidArg(err.to_string()))?;
        datalink.tx_buffer(buf)?;
        self.counters.frame_sent();
        trace!(ptype = %ptype, seq = %seq, sid = %sid, length, "frame sent");
        Ok(())
    }

    fn pop_error(&self, stream: StreamId, err: PopError) -> M2mError {
        match err {
            PopError::Timeout(limit) => M2mError::Timeout(limit),
            PopError::Cancelled => M2mError::Cancelled,
            PopError::Closed if !self.running.load(Ordering::Acquire) => M2mError::Shutdown,
            PopError::Closed => M2mError::StreamClosed(stream),
        }
    }

    fn take_response(
        &self,
        stream: StreamId,
        expected: CommandId,
        capacity: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<Mmbuf> {
        let mut buf = self.streams[stream.index()]
            .pop(timeout)
            .map_err(|err| self.pop_error(stream, err))?;

        let available = buf.data_len();
        let header = buf
            .remove_from_start(M2M_HEADER_SIZE)
            .map(ResponseHeader::decode)
            .unwrap_or(Err(LlcError::Truncated {
                needed: M2M_HEADER_SIZE,
                available,
            }))?;

        if let Some(capacity) = capacity {
            if buf.data_len() > capacity {
                return Err(M2mError::BufferTooSmall {
                    size: buf.data_len(),
                    capacity,
                });
            }
        }
        if header.result != 0 {
            return Err(M2mError::Agent(header.status()));
        }
        if header.id != expected {
            return Err(M2mError::NotFound {
                expected,
                got: header.id,
            });
        }
        Ok(buf)
    }

    fn receive(self: &Arc<Self>, buf: Option<Mmbuf>) {
        let Some(mut buf) = buf else {
            warn!("received null packet");
            self.counters.frame_dropped();
            return;
        };
        self.counters.frame_received();

        let header = buf.remove_from_start(HEADER_SIZE).map(LlcHeader::decode);
        let Some(Ok(header)) = header else {
            warn!(len = buf.data_len(), "packet too small for llc header, dropped");
            self.counters.frame_dropped();
            return;
        };
        let Ok(sid) = header.stream_id() else {
            warn!(sid = header.sid, "invalid stream id, packet dropped");
            self.counters.frame_dropped();
            return;
        };
        let length = usize::from(header.length);
        if length > buf.data_len() {
            warn!(
                length,
                available = buf.data_len(),
                "declared length exceeds packet, dropped"
            );
            self.counters.frame_dropped();
            return;
        }
        buf.truncate(length);

        let seq = header.seq;
        let ptype = header.packet_type();
        let is_start = matches!(ptype, Ok(PacketType::AgentStartNotification));
        let (repeat, expected) = {
            let rx_seq = self.lock_rx();
            (rx_seq.is_repeat(seq), rx_seq.expected())
        };

        if repeat && !is_start {
            debug!(seq = %seq, sid = %sid, "repeated packet dropped");
            self.counters.repeat_dropped();
        } else {
            self.dispatch(sid, ptype, header.ptype, buf);
            match expected {
                Some(expected) if expected != seq && !is_start => {
                    warn!(seq = %seq, expected = %expected, "packet loss detected");
                    self.counters.gap_detected();
                }
                _ => {}
            }
        }

        self.lock_rx().record(seq);
    }

    fn dispatch(
        self: &Arc<Self>,
        sid: StreamId,
        ptype: std::result::Result<PacketType, LlcError>,
        raw_ptype: u8,
        buf: Mmbuf,
    ) {
        match ptype {
            Ok(PacketType::Response) => {
                // Blocks while an earlier response on this stream is unread.
                if self.streams[sid.index()].push(buf).is_err() {
                    debug!(sid = %sid, "stream closed, response dropped");
                }
            }
            Ok(PacketType::Event) => {
                self.events.dispatch(sid, buf);
            }
            Ok(PacketType::Error) => warn!(sid = %sid, "agent reported an error"),
            Ok(PacketType::AgentStartNotification) => self.agent_started(),
            Ok(PacketType::InvalidStream) => warn!(sid = %sid, "agent reported an invalid stream"),
            Ok(PacketType::PacketLossDetected) => warn!(sid = %sid, "agent detected packet loss"),
            Ok(PacketType::SyncResp) => self.sync_response(&buf),
            Ok(
                ptype @ (PacketType::Command | PacketType::AgentReset | PacketType::SyncReq),
            ) => warn!(ptype = %ptype, sid = %sid, "unexpected packet type"),
            Err(_) => warn!(ptype = raw_ptype, sid = %sid, "invalid packet type"),
        }
    }

    fn agent_started(self: &Arc<Self>) {
        {
            let mut handshake = self.lock_handshake();
            handshake.state = AgentState::AgentReady;
            handshake.starts += 1;
            info!(starts = handshake.starts, "agent started");
        }
        self.handshake_changed.notify_all();

        let callback = self
            .start_callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(&Controller {
                inner: Arc::clone(self),
            });
        }
    }

    fn sync_response(&self, buf: &Mmbuf) {
        let response = match SyncResponse::decode(buf.data()) {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "malformed sync response");
                return;
            }
        };
        if response.token != self.pending_token.load(Ordering::Acquire) {
            debug!(token = response.token, "sync response with stale token ignored");
            return;
        }
        if self.sync_slot.offer(response).is_err() {
            debug!("duplicate sync response ignored");
        }
    }
}

fn token_seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or(0)
}
