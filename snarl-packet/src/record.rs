use bytes::Bytes;
use tokio::time::Instant;

use crate::Payload;

/// Which way a captured packet was travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn is_inbound(self) -> bool {
        self == Self::Inbound
    }

    pub fn is_outbound(self) -> bool {
        self == Self::Outbound
    }
}

/// One captured packet as it flows through the module chain.
///
/// Cloning is cheap: the payload is a reference-counted slice and the
/// address metadata blob is a shared buffer.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The raw frame bytes, sliced from the capture arena.
    pub payload: Payload,
    /// Capture direction, used by every module's direction filter.
    pub direction: Direction,
    /// Opaque per-frame address metadata, round-tripped to the driver on
    /// re-injection.
    pub addr: Bytes,
    /// Monotonic capture timestamp. Lag uses this as its delay anchor.
    pub captured_at: Instant,
}

impl Packet {
    pub fn new(payload: Payload, direction: Direction, addr: Bytes, captured_at: Instant) -> Self {
        Self { payload, direction, addr, captured_at }
    }

    /// Direction filter shared by all modules: a record is eligible iff the
    /// module handles its direction.
    pub fn eligible(&self, inbound: bool, outbound: bool) -> bool {
        match self.direction {
            Direction::Inbound => inbound,
            Direction::Outbound => outbound,
        }
    }
}
