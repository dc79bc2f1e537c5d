//! SLIP framed datalink over a byte stream (the UART datalink).
//!
//! Wire format of one datalink packet, before SLIP escaping. The optional
//! CRC16-XMODEM (2B LE, present if hdr & 0x80) covers the LLC frame, and its
//! position depends on the direction:
//! ```text
//! controller -> agent:  ┌──────────┬─────────┬─────────────┐
//!                       │ Hdr (1B) │ CRC (2B)│ LLC frame   │
//!                       └──────────┴─────────┴─────────────┘
//! agent -> controller:  ┌──────────┬─────────────┬─────────┐
//!                       │ Hdr (1B) │ LLC frame   │ CRC (2B)│
//!                       └──────────┴─────────────┴─────────┘
//! ```
//! The low nibble of the header is the datalink packet type; only data
//! packets (0) are passed up.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_XMODEM};
use tracing::{debug, warn};

use crate::error::{DatalinkError, Result};
use crate::mmbuf::Mmbuf;
use crate::traits::{Datalink, DatalinkInit, RxCallback};

pub const SLIP_END: u8 = 0xC0;
pub const SLIP_ESC: u8 = 0xDB;
pub const SLIP_ESC_END: u8 = 0xDC;
pub const SLIP_ESC_ESC: u8 = 0xDD;

const HDR_LENGTH: usize = 1;
const CRC_LENGTH: usize = 2;
const HDR_PKT_TYPE_MASK: u8 = 0x0F;
const HDR_PKT_TYPE_DATA: u8 = 0x00;
const FLAG_CRC_PRESENT: u8 = 0x80;

const READ_CHUNK_SIZE: usize = 512;

/// Default largest LLC frame carried by one datalink packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 2048;

/// Datalink header and CRC bytes added around each LLC frame at most.
pub const MAX_OVERHEAD: usize = HDR_LENGTH + CRC_LENGTH;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Which end of the link this port sits on. Decides where the CRC goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlipRole {
    /// Sends `hdr || crc || llc`, expects `hdr || llc || crc`.
    #[default]
    Controller,
    /// Sends `hdr || llc || crc`, expects `hdr || crc || llc`.
    Agent,
}

impl SlipRole {
    /// The role at the other end of the wire.
    pub fn peer(self) -> Self {
        match self {
            Self::Controller => Self::Agent,
            Self::Agent => Self::Controller,
        }
    }
}

/// Configuration for the SLIP datalink.
#[derive(Debug, Clone)]
pub struct SlipConfig {
    /// Largest LLC frame accepted on receive and allowed on transmit,
    /// excluding the datalink header and CRC.
    pub max_packet_size: usize,
    /// Protect outgoing packets with a CRC16.
    pub tx_crc: bool,
    pub role: SlipRole,
}

impl Default for SlipConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            tx_crc: false,
            role: SlipRole::Controller,
        }
    }
}

/// SLIP-encode `frame` into `dst`, delimited by END on both sides.
pub fn slip_encode(frame: &[u8], dst: &mut BytesMut) {
    dst.reserve(frame.len() + 2);
    dst.put_u8(SLIP_END);
    for &byte in frame {
        match byte {
            SLIP_END => dst.put_slice(&[SLIP_ESC, SLIP_ESC_END]),
            SLIP_ESC => dst.put_slice(&[SLIP_ESC, SLIP_ESC_ESC]),
            _ => dst.put_u8(byte),
        }
    }
    dst.put_u8(SLIP_END);
}

/// Incremental SLIP decoder.
#[derive(Debug)]
pub struct SlipDecoder {
    buf: BytesMut,
    max_len: usize,
    escaping: bool,
    discarding: bool,
}

impl SlipDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len),
            max_len,
            escaping: false,
            discarding: false,
        }
    }

    /// Feed one byte. Returns a packet when an END delimiter completes one.
    ///
    /// After an error the rest of the packet is discarded up to the next END.
    pub fn push(&mut self, byte: u8) -> Result<Option<Bytes>> {
        if byte == SLIP_END {
            let discarded = self.discarding;
            self.escaping = false;
            self.discarding = false;
            if discarded || self.buf.is_empty() {
                self.buf.clear();
                return Ok(None);
            }
            return Ok(Some(self.buf.split().freeze()));
        }

        if self.discarding {
            return Ok(None);
        }

        let decoded = if self.escaping {
            self.escaping = false;
            match byte {
                SLIP_ESC_END => SLIP_END,
                SLIP_ESC_ESC => SLIP_ESC,
                other => {
                    self.discard();
                    return Err(DatalinkError::InvalidEscape(other));
                }
            }
        } else if byte == SLIP_ESC {
            self.escaping = true;
            return Ok(None);
        } else {
            byte
        };

        if self.buf.len() >= self.max_len {
            self.discard();
            return Err(DatalinkError::PacketTooLarge {
                size: self.max_len + 1,
                max: self.max_len,
            });
        }
        self.buf.put_u8(decoded);
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.escaping = false;
        self.discarding = false;
    }

    fn discard(&mut self) {
        self.buf.clear();
        self.discarding = true;
    }
}

/// Wrap an outgoing LLC frame in the datalink header (and optional CRC,
/// placed as `role` sends it), then SLIP-encode it.
pub fn encode_packet(mut buf: Mmbuf, tx_crc: bool, role: SlipRole) -> Result<BytesMut> {
    let mut hdr = HDR_PKT_TYPE_DATA;
    if tx_crc {
        let crc = CRC16.checksum(buf.data()).to_le_bytes();
        match role {
            SlipRole::Controller => buf.prepend_data(&crc)?,
            SlipRole::Agent => buf.append_data(&crc),
        }
        hdr |= FLAG_CRC_PRESENT;
    }
    buf.prepend_data(&[hdr])?;

    let mut out = BytesMut::with_capacity(buf.data_len() + 2);
    slip_encode(buf.data(), &mut out);
    Ok(out)
}

/// Validate a SLIP-decoded packet received by `role` and strip the
/// datalink header and CRC.
///
/// Returns `None` (after logging) for anything that must not reach the LLC.
pub fn decode_packet(packet: &[u8], role: SlipRole) -> Option<Mmbuf> {
    let mut buf = Mmbuf::from_slice(packet);

    let Some(&[hdr]) = buf.remove_from_start(HDR_LENGTH) else {
        warn!("received packet too short, dropping");
        return None;
    };

    if hdr & FLAG_CRC_PRESENT != 0 {
        let crc = match role {
            SlipRole::Controller => buf.remove_from_end(CRC_LENGTH),
            SlipRole::Agent => buf.remove_from_start(CRC_LENGTH),
        };
        let Some(&[lo, hi]) = crc else {
            warn!("received packet too short for crc, dropping");
            return None;
        };
        let rx_crc = u16::from_le_bytes([lo, hi]);
        let calc_crc = CRC16.checksum(buf.data());
        if rx_crc != calc_crc {
            warn!(rx_crc, calc_crc, "crc validation failure, dropping");
            return None;
        }
    }

    let pkt_type = hdr & HDR_PKT_TYPE_MASK;
    if pkt_type != HDR_PKT_TYPE_DATA {
        warn!(pkt_type, "unknown datalink packet type, dropping");
        return None;
    }

    Some(buf)
}

type ShutdownHook = Box<dyn Fn() + Send + Sync>;

/// A SLIP datalink description over a reader/writer pair.
///
/// Started through [`DatalinkInit::init`], which spawns the receive thread.
pub struct SlipPort<R, W> {
    reader: R,
    writer: W,
    config: SlipConfig,
    shutdown: Option<ShutdownHook>,
}

impl<R, W> SlipPort<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    /// Create a port with default configuration.
    ///
    /// Without a shutdown hook, the receive thread only ends when the reader
    /// reports EOF or an error.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            config: SlipConfig::default(),
            shutdown: None,
        }
    }

    /// Override the link configuration.
    pub fn with_config(mut self, config: SlipConfig) -> Self {
        self.config = config;
        self
    }

    /// Set which end of the link this port is.
    pub fn with_role(mut self, role: SlipRole) -> Self {
        self.config.role = role;
        self
    }

    /// Install a hook that unblocks the reader, run on `deinit()`.
    pub fn with_shutdown(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.shutdown = Some(Box::new(hook));
        self
    }
}

#[cfg(unix)]
impl SlipPort<std::os::unix::net::UnixStream, std::os::unix::net::UnixStream> {
    /// Build a port over a connected Unix stream.
    pub fn unix(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        Ok(Self::new(reader, stream).with_shutdown(move || {
            let _ = control.shutdown(std::net::Shutdown::Both);
        }))
    }
}

impl<R, W> DatalinkInit for SlipPort<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    fn init(self, rx_callback: RxCallback) -> Result<Box<dyn Datalink>> {
        let running = Arc::new(AtomicBool::new(true));
        let rx_thread = {
            let running = Arc::clone(&running);
            let max_packet_size = self.config.max_packet_size;
            let role = self.config.role;
            let reader = self.reader;
            std::thread::Builder::new()
                .name("mmagic-slip-rx".to_string())
                .spawn(move || rx_loop(reader, max_packet_size, role, running, rx_callback))?
        };

        Ok(Box::new(SlipDatalink {
            writer: Mutex::new(Box::new(self.writer)),
            config: self.config,
            running,
            shutdown: self.shutdown,
            rx_thread: Mutex::new(Some(rx_thread)),
        }))
    }
}

fn rx_loop<R: Read>(
    mut reader: R,
    max_packet_size: usize,
    role: SlipRole,
    running: Arc<AtomicBool>,
    rx_callback: RxCallback,
) {
    let mut decoder = SlipDecoder::new(max_packet_size + MAX_OVERHEAD);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while running.load(Ordering::Acquire) {
        let read = match reader.read(&mut chunk) {
            Ok(0) => {
                debug!("slip datalink reached end of stream");
                break;
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = %err, "slip datalink read failed");
                break;
            }
        };

        for &byte in &chunk[..read] {
            match decoder.push(byte) {
                Ok(Some(packet)) => {
                    if !running.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(buf) = decode_packet(&packet, role) {
                        rx_callback(Some(buf));
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "slip framing error, dropping packet"),
            }
        }
    }
}

/// A running SLIP datalink.
pub struct SlipDatalink {
    writer: Mutex<Box<dyn Write + Send>>,
    config: SlipConfig,
    running: Arc<AtomicBool>,
    shutdown: Option<ShutdownHook>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Datalink for SlipDatalink {
    fn alloc_buffer_for_tx(&self, header_size: usize, payload_size: usize) -> Option<Mmbuf> {
        Some(Mmbuf::alloc(
            header_size + MAX_OVERHEAD,
            payload_size + CRC_LENGTH,
        ))
    }

    fn tx_buffer(&self, buf: Mmbuf) -> Result<usize> {
        if !self.running.load(Ordering::Acquire) {
            return Err(DatalinkError::Shutdown);
        }

        let size = buf.data_len();
        if size > self.config.max_packet_size {
            return Err(DatalinkError::PacketTooLarge {
                size,
                max: self.config.max_packet_size,
            });
        }

        let encoded = encode_packet(buf, self.config.tx_crc, self.config.role)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(encoded.len())
    }

    fn deinit(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(hook) = &self.shutdown else {
            return;
        };
        hook();

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

impl Drop for SlipDatalink {
    fn drop(&mut self) {
        self.deinit();
    }
}
