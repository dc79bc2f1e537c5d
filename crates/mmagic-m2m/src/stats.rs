use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Frame counters of one link endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Frames discarded before sequencing (short, bad stream id, bad length).
    pub frames_dropped: u64,
    /// Frames discarded as retransmissions.
    pub repeats_dropped: u64,
    /// Sequence gaps observed between processed frames.
    pub gaps_detected: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LinkCounters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    repeats: AtomicU64,
    gaps: AtomicU64,
}

impl LinkCounters {
    pub(crate) fn frame_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn repeat_dropped(&self) {
        self.repeats.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn gap_detected(&self) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.sent.load(Ordering::Relaxed),
            frames_received: self.received.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            repeats_dropped: self.repeats.load(Ordering::Relaxed),
            gaps_detected: self.gaps.load(Ordering::Relaxed),
        }
    }
}
