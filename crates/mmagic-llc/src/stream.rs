use std::fmt;

use crate::error::{LlcError, Result};

/// Number of logical streams multiplexed over one link.
pub const MAX_STREAMS: usize = 32;

/// The stream that carries events and control traffic.
pub const CONTROL_STREAM: StreamId = StreamId(0);

/// A validated stream id in `0..MAX_STREAMS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u8);

impl StreamId {
    pub fn new(raw: u8) -> Result<Self> {
        if usize::from(raw) >= MAX_STREAMS {
            return Err(LlcError::InvalidStream(raw));
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Position of this stream in a `MAX_STREAMS`-sized table.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_control(self) -> bool {
        self == CONTROL_STREAM
    }

    /// Every valid stream id in ascending order.
    pub fn all() -> impl Iterator<Item = StreamId> {
        (0..MAX_STREAMS as u8).map(StreamId)
    }
}

impl TryFrom<u8> for StreamId {
    type Error = LlcError;

    fn try_from(raw: u8) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<StreamId> for u8 {
    fn from(id: StreamId) -> u8 {
        id.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        assert!(StreamId::new(0).unwrap().is_control());
        assert_eq!(StreamId::new(31).unwrap().index(), 31);
        assert_eq!(StreamId::new(32), Err(LlcError::InvalidStream(32)));
        assert_eq!(StreamId::try_from(255), Err(LlcError::InvalidStream(255)));
    }

    #[test]
    fn all_covers_table() {
        let ids: Vec<_> = StreamId::all().collect();
        assert_eq!(ids.len(), MAX_STREAMS);
        assert_eq!(ids[0], CONTROL_STREAM);
        assert_eq!(ids[MAX_STREAMS - 1].get(), 31);
    }
}
