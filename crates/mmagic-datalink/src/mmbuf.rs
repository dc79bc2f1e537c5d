use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::{DatalinkError, Result};

/// A packet buffer with reserved headroom.
///
/// Each layer on the TX path prepends its header into the headroom left by
/// the allocator, and each layer on the RX path strips its header from the
/// front. The data region is `start..end` of the backing storage.
pub struct Mmbuf {
    buf: BytesMut,
    start: usize,
    end: usize,
}

impl Mmbuf {
    /// Allocate a buffer with `space_at_start` bytes of headroom and room for
    /// `capacity` bytes of data after it.
    pub fn alloc(space_at_start: usize, capacity: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(space_at_start + capacity),
            start: space_at_start,
            end: space_at_start,
        }
    }

    /// Create a buffer holding a copy of `data` with no headroom.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(data.len());
        buf.extend_from_slice(data);
        Self {
            buf,
            start: 0,
            end: data.len(),
        }
    }

    /// The current data region.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Length of the current data region.
    pub fn data_len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes that can still be prepended.
    pub fn available_space_at_start(&self) -> usize {
        self.start
    }

    /// Bytes that can be appended without growing the backing storage.
    pub fn available_space_at_end(&self) -> usize {
        self.buf.len() - self.end
    }

    /// Append `data` after the current data region, growing if needed.
    pub fn append_data(&mut self, data: &[u8]) {
        let new_end = self.end + data.len();
        if new_end > self.buf.len() {
            self.buf.resize(new_end, 0);
        }
        self.buf[self.end..new_end].copy_from_slice(data);
        self.end = new_end;
    }

    /// Prepend `data` into the headroom.
    pub fn prepend_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.start {
            return Err(DatalinkError::InsufficientHeadroom {
                needed: data.len(),
                available: self.start,
            });
        }
        self.start -= data.len();
        self.buf[self.start..self.start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Strip `len` bytes from the front and return them.
    ///
    /// Returns `None` and leaves the buffer untouched if fewer than `len`
    /// bytes are available.
    pub fn remove_from_start(&mut self, len: usize) -> Option<&[u8]> {
        if len > self.data_len() {
            return None;
        }
        let from = self.start;
        self.start += len;
        Some(&self.buf[from..from + len])
    }

    /// Strip `len` bytes from the back and return them.
    pub fn remove_from_end(&mut self, len: usize) -> Option<&[u8]> {
        if len > self.data_len() {
            return None;
        }
        self.end -= len;
        Some(&self.buf[self.end..self.end + len])
    }

    /// Shorten the data region to `len` bytes. No-op if already shorter.
    pub fn truncate(&mut self, len: usize) {
        if len < self.data_len() {
            self.end = self.start + len;
        }
    }

    /// Consume the buffer, returning only the data region.
    pub fn into_bytes(self) -> Bytes {
        let mut buf = self.buf;
        buf.truncate(self.end);
        let _ = buf.split_to(self.start);
        buf.freeze()
    }
}

impl fmt::Debug for Mmbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mmbuf")
            .field("headroom", &self.start)
            .field("len", &self.data_len())
            .finish()
    }
}
