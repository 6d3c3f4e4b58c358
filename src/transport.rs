use crate::types::PeerId;

/// Seam to the transport collaborator. Implementations deliver outbound
/// payloads to a remote peer; inbound traffic re-enters the core through
/// `ProtocolManager::propagate_event`.
///
/// The first byte of every payload is the protocol tag (see
/// [`crate::ProtocolKind`]); the receiving manager peels it off before the
/// target protocol sees the data.
pub trait Transport: Send + Sync {
    fn send(&self, peer: PeerId, payload: Vec<u8>, reliable: bool);
}
