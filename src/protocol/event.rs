use crate::protocol::error::EventError;
use crate::protocol::kind::{ProtocolKind, SYNCHRONOUS_BIT};
use crate::types::PeerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    Message,
    Disconnected,
}

/// Raw notification handed in by the transport collaborator. For Message
/// events, `data` initially starts with the protocol tag byte; the manager
/// peels it off during classification, so by the time a protocol sees the
/// event only the payload remains.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub peer: PeerId,
    pub kind: EventKind,
    pub data: Vec<u8>,
}

impl InboundEvent {
    pub fn connected(peer: PeerId) -> Self {
        Self {
            peer,
            kind: EventKind::Connected,
            data: Vec::new(),
        }
    }

    pub fn message(peer: PeerId, data: Vec<u8>) -> Self {
        Self {
            peer,
            kind: EventKind::Message,
            data,
        }
    }

    pub fn disconnected(peer: PeerId) -> Self {
        Self {
            peer,
            kind: EventKind::Disconnected,
            data: Vec::new(),
        }
    }
}

/// Where an event should be routed once classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTarget {
    Kind(ProtocolKind),
    /// Disconnected notifications go to every running protocol
    Broadcast,
}

/// Resolves the target protocol family and the synchronous-delivery flag,
/// consuming the leading tag byte of Message events.
pub fn classify(event: &mut InboundEvent) -> Result<(EventTarget, bool), EventError> {
    match event.kind {
        EventKind::Message => {
            if event.data.is_empty() {
                return Err(EventError::MissingTag);
            }
            let tag = event.data.remove(0);
            let kind = ProtocolKind::from_tag(tag)?;
            Ok((EventTarget::Kind(kind), tag & SYNCHRONOUS_BIT != 0))
        }
        // Connected events concern the handshake protocol
        EventKind::Connected => Ok((EventTarget::Kind(ProtocolKind::Connection), false)),
        EventKind::Disconnected => Ok((EventTarget::Broadcast, false)),
    }
}
