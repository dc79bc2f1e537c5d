//! Agent end of the link.
//!
//! The agent answers what the controller sends. COMMAND frames are queued to
//! a worker thread per open stream which runs the [`CommandHandler`] and
//! replies with a RESPONSE echoing the command's triple. Link-level trouble
//! is reported back to the controller as ERROR, INVALID_STREAM or
//! PACKET_LOSS_DETECTED frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};
use std::thread::{self, JoinHandle};

use bytes::{BufMut, Bytes, BytesMut};
use mmagic_datalink::{Datalink, DatalinkInit, Mmbuf, RxCallback};
use mmagic_llc::header::payload_length;
use mmagic_llc::{
    CommandHeader, CommandId, EventHeader, LlcHeader, PacketType, ResponseHeader, RxSequencer,
    Status, StreamId, SyncRequest, SyncResponse, TxSequencer, CONTROL_STREAM, HEADER_SIZE,
    M2M_HEADER_SIZE, MAX_STREAMS, PROTOCOL_VERSION,
};
use tracing::{debug, info, trace, warn};

use crate::error::{M2mError, Result};
use crate::slot::StreamSlot;
use crate::stats::{LinkCounters, LinkStats};

/// Executes commands on behalf of the agent.
pub trait CommandHandler: Send + Sync + 'static {
    /// Run `command`. `Ok` carries the response payload; `Err` becomes the
    /// response's result byte with an empty payload.
    fn handle(
        &self,
        stream: StreamId,
        command: CommandId,
        payload: &[u8],
    ) -> std::result::Result<Bytes, Status>;
}

impl<F> CommandHandler for F
where
    F: Fn(StreamId, CommandId, &[u8]) -> std::result::Result<Bytes, Status>
        + Send
        + Sync
        + 'static,
{
    fn handle(
        &self,
        stream: StreamId,
        command: CommandId,
        payload: &[u8],
    ) -> std::result::Result<Bytes, Status> {
        self(stream, command, payload)
    }
}

/// Invoked when the controller asks the agent to reset.
pub type ResetHook = Arc<dyn Fn() + Send + Sync>;

/// Agent settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Reported by handlers that answer version queries.
    pub app_version: String,
    /// Announce the agent with AGENT_START_NOTIFICATION at init and after
    /// every reset.
    pub send_start_notification: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            send_start_notification: true,
        }
    }
}

/// A running agent.
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    handler: Arc<dyn CommandHandler>,
    datalink: OnceLock<Box<dyn Datalink>>,
    running: AtomicBool,
    tx_seq: Mutex<TxSequencer>,
    rx_seq: Mutex<RxSequencer>,
    streams: Vec<Arc<StreamSlot<Mmbuf>>>,
    /// `Some` for every open stream.
    workers: Mutex<Vec<Option<JoinHandle<()>>>>,
    reset_hook: RwLock<Option<ResetHook>>,
    counters: LinkCounters,
}

impl Agent {
    /// Open the control stream, start the datalink and announce the agent.
    pub fn init<L, H>(link: L, handler: H, config: AgentConfig) -> Result<Self>
    where
        L: DatalinkInit,
        H: CommandHandler,
    {
        let inner = Arc::new(AgentInner {
            config,
            handler: Arc::new(handler),
            datalink: OnceLock::new(),
            running: AtomicBool::new(true),
            tx_seq: Mutex::new(TxSequencer::new()),
            rx_seq: Mutex::new(RxSequencer::new()),
            streams: (0..MAX_STREAMS)
                .map(|_| Arc::new(StreamSlot::new()))
                .collect(),
            workers: Mutex::new((0..MAX_STREAMS).map(|_| None).collect()),
            reset_hook: RwLock::new(None),
            counters: LinkCounters::default(),
        });
        inner.start_worker(CONTROL_STREAM)?;

        let weak = Arc::downgrade(&inner);
        let callback: RxCallback = Arc::new(move |buf: Option<Mmbuf>| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(buf);
            }
        });
        let datalink = link.init(callback)?;
        let _ = inner.datalink.set(datalink);

        if inner.config.send_start_notification {
            inner.send_start_notification()?;
        }
        info!(version = %inner.config.app_version, "agent started");
        Ok(Self { inner })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> LinkStats {
        self.inner.counters.snapshot()
    }

    /// Open the lowest free stream and start its worker.
    pub fn open_stream(&self) -> Result<StreamId> {
        let free = {
            let workers = self.inner.lock_workers();
            workers
                .iter()
                .position(Option::is_none)
                .ok_or(M2mError::NoFreeStream)?
        };
        let sid = StreamId::new(free as u8)?;
        self.inner.start_worker(sid)?;
        Ok(sid)
    }

    /// Stop the worker of `stream`. A command still queued for it is dropped.
    pub fn close_stream(&self, stream: StreamId) -> Result<()> {
        if stream.is_control() {
            return Err(M2mError::InvalidArg(
                "the control stream cannot be closed".to_string(),
            ));
        }
        let worker = self.inner.lock_workers()[stream.index()].take();
        let Some(worker) = worker else {
            return Err(M2mError::StreamClosed(stream));
        };
        self.inner.streams[stream.index()].close();
        join_worker(worker);
        debug!(sid = %stream, "stream closed");
        Ok(())
    }

    pub fn is_stream_open(&self, stream: StreamId) -> bool {
        self.inner.lock_workers()[stream.index()].is_some()
    }

    /// Run `hook` whenever the controller sends AGENT_RESET.
    pub fn set_reset_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .inner
            .reset_hook
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(hook));
    }

    /// Send an EVENT frame on the control stream.
    pub fn send_event(&self, subsystem: u8, event: u8, args: &[u8]) -> Result<()> {
        let mut payload = BytesMut::with_capacity(M2M_HEADER_SIZE + args.len());
        payload.put_slice(&EventHeader::new(subsystem, event).encode());
        payload.put_slice(args);
        self.inner
            .send_payload(PacketType::Event, CONTROL_STREAM.get(), &payload)
    }

    pub fn send_start_notification(&self) -> Result<()> {
        self.inner.send_start_notification()
    }

    /// Stop every worker and the datalink.
    pub fn deinit(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for slot in &self.inner.streams {
            slot.close();
        }
        let workers: Vec<_> = self
            .inner
            .lock_workers()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for worker in workers {
            join_worker(worker);
        }
        if let Some(datalink) = self.inner.datalink.get() {
            datalink.deinit();
        }
        info!("agent stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn join_worker(worker: JoinHandle<()>) {
    if worker.thread().id() != thread::current().id() {
        let _ = worker.join();
    }
}

impl AgentInner {
    fn datalink(&self) -> Result<&dyn Datalink> {
        if !self.running.load(Ordering::Acquire) {
            return Err(M2mError::Shutdown);
        }
        self.datalink
            .get()
            .map(|datalink| datalink.as_ref())
            .ok_or(M2mError::Shutdown)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<Option<JoinHandle<()>>>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_rx(&self) -> MutexGuard<'_, RxSequencer> {
        self.rx_seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tx(&self) -> MutexGuard<'_, TxSequencer> {
        self.tx_seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_worker(self: &Arc<Self>, sid: StreamId) -> Result<()> {
        let mut workers = self.lock_workers();
        if workers[sid.index()].is_some() {
            return Err(M2mError::StreamBusy(sid));
        }
        let slot = Arc::clone(&self.streams[sid.index()]);
        slot.reopen();

        let agent = Arc::downgrade(self);
        let handler = Arc::clone(&self.handler);
        let worker = thread::Builder::new()
            .name(format!("mmagic-stream-{sid}"))
            .spawn(move || run_worker(agent, handler, slot, sid))?;
        workers[sid.index()] = Some(worker);
        debug!(sid = %sid, "stream opened");
        Ok(())
    }

    /// Frame `payload` and transmit it. The TX sequence number only advances
    /// when the datalink accepts the frame.
    fn send_payload(&self, ptype: PacketType, sid: u8, payload: &[u8]) -> Result<()> {
        let datalink = self.datalink()?;
        let length =
            payload_length(payload.len()).map_err(|err| M2mError::InvalidArg(err.to_string()))?;
        let mut buf = datalink
            .alloc_buffer_for_tx(HEADER_SIZE, payload.len())
            .ok_or(M2mError::NoMem)?;
        buf.append_data(payload);

        let mut tx_seq = self.lock_tx();
        let seq = tx_seq.peek_next();
        let header = LlcHeader {
            ptype: ptype.as_u8(),
            seq,
            sid,
            length,
        };
        buf.prepend_data(&header.encode())
            .map_err(|err| M2mError::InvalidArg(err.to_string()))?;
        datalink.tx_buffer(buf)?;
        tx_seq.commit(seq);
        self.counters.frame_sent();
        trace!(ptype = %ptype, seq = %seq, sid, length, "frame sent");
        Ok(())
    }

    /// Send an empty notification frame, logging failures.
    fn notify(&self, ptype: PacketType, sid: u8) {
        if let Err(err) = self.send_payload(ptype, sid, &[]) {
            warn!(ptype = %ptype, sid, error = %err, "failed to notify controller");
        }
    }

    fn send_start_notification(&self) -> Result<()> {
        self.send_payload(
            PacketType::AgentStartNotification,
            CONTROL_STREAM.get(),
            &[],
        )
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

        if self.process(header, buf) {
            self.restart();
        } else {
            self.lock_rx().record(header.seq);
        }
    }

    /// Handle one frame. Returns `true` if the controller requested a reset.
    fn process(self: &Arc<Self>, header: LlcHeader, mut buf: Mmbuf) -> bool {
        let Ok(sid) = header.stream_id() else {
            warn!(sid = header.sid, "invalid stream id");
            self.counters.frame_dropped();
            self.notify(PacketType::InvalidStream, header.sid);
            return false;
        };
        let length = usize::from(header.length);
        if length > buf.data_len() {
            warn!(
                length,
                available = buf.data_len(),
                "declared length exceeds packet"
            );
            self.counters.frame_dropped();
            self.notify(PacketType::Error, header.sid);
            return false;
        }
        buf.truncate(length);

        let seq = header.seq;
        let ptype = header.packet_type();
        let rx_seq = *self.lock_rx();
        let recovery = matches!(ptype, Ok(PacketType::AgentReset | PacketType::SyncReq));
        if rx_seq.is_repeat(seq) && !recovery {
            debug!(seq = %seq, sid = %sid, "repeated packet dropped");
            self.counters.repeat_dropped();
            return false;
        }

        let mut reset = false;
        match ptype {
            Ok(PacketType::Command) => self.route_command(sid, buf),
            Ok(PacketType::Error) => warn!(sid = %sid, "controller reported an error"),
            Ok(PacketType::AgentReset) => {
                info!("reset requested by controller");
                reset = true;
            }
            Ok(PacketType::SyncReq) => self.answer_sync(sid, &buf, rx_seq),
            Ok(other) => {
                warn!(ptype = %other, sid = %sid, "unexpected packet type");
                self.notify(PacketType::Error, sid.get());
            }
            Err(_) => {
                warn!(ptype = header.ptype, sid = %sid, "invalid packet type");
                self.notify(PacketType::Error, sid.get());
            }
        }

        if !matches!(ptype, Ok(PacketType::SyncReq)) {
            if let Some(expected) = rx_seq.expected().filter(|expected| *expected != seq) {
                warn!(seq = %seq, expected = %expected, "packet loss detected");
                self.counters.gap_detected();
                self.notify(PacketType::PacketLossDetected, sid.get());
            }
        }
        reset
    }

    fn route_command(&self, sid: StreamId, buf: Mmbuf) {
        let open = self.lock_workers()[sid.index()].is_some();
        // Blocks while the stream's worker still has a command queued.
        if !open || self.streams[sid.index()].push(buf).is_err() {
            warn!(sid = %sid, "command for a stream that is not open");
            self.notify(PacketType::InvalidStream, sid.get());
        }
    }

    fn answer_sync(&self, sid: StreamId, buf: &Mmbuf, rx_seq: RxSequencer) {
        if buf.data_len() != SyncRequest::SIZE {
            warn!(len = buf.data_len(), "sync request with bad length");
            self.notify(PacketType::Error, sid.get());
            return;
        }
        let request = match SyncRequest::decode(buf.data()) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "malformed sync request");
                self.notify(PacketType::Error, sid.get());
                return;
            }
        };
        let response = SyncResponse {
            token: request.token,
            last_seen_seq: rx_seq.last_seen(),
            protocol_version: PROTOCOL_VERSION,
        };
        debug!(token = request.token, last_seen = ?response.last_seen_seq.map(|seq| seq.get()), "answering sync request");
        if let Err(err) = self.send_payload(PacketType::SyncResp, sid.get(), &response.encode()) {
            warn!(error = %err, "failed to answer sync request");
        }
    }

    /// Forget the link state as a freshly booted agent would and announce
    /// the agent again.
    fn restart(&self) {
        let hook = self
            .reset_hook
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(hook) = hook {
            hook();
        }
        self.lock_rx().reset();
        self.lock_tx().reset_to(None);
        if self.config.send_start_notification {
            if let Err(err) = self.send_start_notification() {
                warn!(error = %err, "failed to announce agent after reset");
            }
        }
    }
}

impl Drop for AgentInner {
    fn drop(&mut self) {
        for slot in &self.streams {
            slot.close();
        }
    }
}

fn run_worker(
    agent: Weak<AgentInner>,
    handler: Arc<dyn CommandHandler>,
    slot: Arc<StreamSlot<Mmbuf>>,
    sid: StreamId,
) {
    while let Ok(mut buf) = slot.pop(None) {
        let header = buf.remove_from_start(M2M_HEADER_SIZE).map(CommandHeader::decode);
        let (id, result) = match header {
            Some(Ok(header)) => (header.id, handler.handle(sid, header.id, buf.data())),
            _ => {
                warn!(sid = %sid, "command too short for header");
                (CommandId::new(0, 0, 0), Err(Status::Error))
            }
        };

        let response = encode_response(id, result);
        let Some(agent) = agent.upgrade() else {
            break;
        };
        if let Err(err) = agent.send_payload(PacketType::Response, sid.get(), &response) {
            warn!(sid = %sid, error = %err, "failed to send response");
        }
    }
    debug!(sid = %sid, "stream worker stopped");
}

fn encode_response(id: CommandId, result: std::result::Result<Bytes, Status>) -> Bytes {
    let (status, payload) = match result {
        Ok(payload) => (Status::Ok, payload),
        Err(status) => (status, Bytes::new()),
    };
    let mut out = BytesMut::with_capacity(M2M_HEADER_SIZE + payload.len());
    out.put_slice(&ResponseHeader::new(id, status).encode());
    out.put_slice(&payload);
    out.freeze()
}
