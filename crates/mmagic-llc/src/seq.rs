use std::fmt;

/// A 4-bit LLC sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seq(u8);

impl Seq {
    pub const ZERO: Seq = Seq(0);
    pub const MASK: u8 = 0x0F;

    /// Returns `None` for values that do not fit in four bits.
    pub fn new(raw: u8) -> Option<Self> {
        (raw <= Self::MASK).then_some(Self(raw))
    }

    /// Extract the sequence number from a TSEQ byte.
    pub fn from_tseq(tseq: u8) -> Self {
        Self(tseq & Self::MASK)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The successor, wrapping 15 to 0.
    pub fn next(self) -> Self {
        Self((self.0 + 1) & Self::MASK)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receive-side sequence state for one direction of a link.
///
/// Before the first frame nothing has been seen, so no frame counts as a
/// repeat and no gap can be reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxSequencer {
    last_seen: Option<Seq>,
}

impl RxSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> Option<Seq> {
        self.last_seen
    }

    /// The sequence number the next in-order frame should carry.
    pub fn expected(&self) -> Option<Seq> {
        self.last_seen.map(Seq::next)
    }

    /// `seq` equals the last one seen, i.e. this is a retransmission.
    pub fn is_repeat(&self, seq: Seq) -> bool {
        self.last_seen == Some(seq)
    }

    /// `seq` is not the successor of the last one seen.
    pub fn is_gap(&self, seq: Seq) -> bool {
        matches!(self.expected(), Some(expected) if expected != seq)
    }

    pub fn record(&mut self, seq: Seq) {
        self.last_seen = Some(seq);
    }

    pub fn reset(&mut self) {
        self.last_seen = None;
    }
}

/// Transmit-side sequence state for one direction of a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxSequencer {
    last_sent: Option<Seq>,
}

impl TxSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self) -> Option<Seq> {
        self.last_sent
    }

    /// The number the next frame will carry. The first frame carries 0.
    pub fn peek_next(&self) -> Seq {
        self.last_sent.map_or(Seq::ZERO, Seq::next)
    }

    /// Take the next number and mark it as sent.
    pub fn advance(&mut self) -> Seq {
        let seq = self.peek_next();
        self.last_sent = Some(seq);
        seq
    }

    /// Mark `seq` as sent without going through [`TxSequencer::advance`].
    pub fn commit(&mut self, seq: Seq) {
        self.last_sent = Some(seq);
    }

    pub fn reset_to(&mut self, last_sent: Option<Seq>) {
        self.last_sent = last_sent;
    }
}
