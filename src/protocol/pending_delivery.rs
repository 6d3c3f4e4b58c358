use std::time::Instant;

use crate::protocol::event::InboundEvent;
use crate::types::ProtocolId;

/// An inbound event waiting to be offered to the protocols interested in its
/// type. The candidate list shrinks as protocols consume the event; the
/// wrapper is discarded once the list empties or the retention window
/// elapses.
pub struct PendingDelivery {
    pub event: InboundEvent,
    pub arrival: Instant,
    pub synchronous: bool,
    pub candidates: Vec<ProtocolId>,
}

impl PendingDelivery {
    pub fn new(event: InboundEvent, synchronous: bool, candidates: Vec<ProtocolId>) -> Self {
        Self {
            event,
            arrival: Instant::now(),
            synchronous,
            candidates,
        }
    }
}
