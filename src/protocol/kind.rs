use crate::protocol::error::EventError;

/// Bit in the wire tag marking an event for synchronous (simulation-thread)
/// delivery rather than background delivery.
pub const SYNCHRONOUS_BIT: u8 = 0x80;

/// The protocol families the manager can route to. The low seven bits of the
/// leading payload byte select the family; the high bit is
/// [`SYNCHRONOUS_BIT`]. Resolution is done through this enum rather than by
/// matching raw bytes at every dispatch site, but the tag-byte wire shape is
/// preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// Connection handshake. Connected transport events route here.
    Connection,
    /// Lobby traffic.
    Lobby,
    /// In-game event exchange (item pickups, control transitions, ...).
    GameEvents,
    /// Clock synchronization probes.
    ClockSync,
}

impl ProtocolKind {
    pub fn to_tag(self) -> u8 {
        match self {
            ProtocolKind::Connection => 1,
            ProtocolKind::Lobby => 2,
            ProtocolKind::GameEvents => 3,
            ProtocolKind::ClockSync => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, EventError> {
        match tag & !SYNCHRONOUS_BIT {
            1 => Ok(ProtocolKind::Connection),
            2 => Ok(ProtocolKind::Lobby),
            3 => Ok(ProtocolKind::GameEvents),
            4 => Ok(ProtocolKind::ClockSync),
            other => Err(EventError::UnknownKind { tag: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        for kind in [
            ProtocolKind::Connection,
            ProtocolKind::Lobby,
            ProtocolKind::GameEvents,
            ProtocolKind::ClockSync,
        ] {
            assert_eq!(ProtocolKind::from_tag(kind.to_tag()).unwrap(), kind);
            // Synchronous flag does not change the resolved kind
            assert_eq!(
                ProtocolKind::from_tag(kind.to_tag() | SYNCHRONOUS_BIT).unwrap(),
                kind
            );
        }
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert!(matches!(
            ProtocolKind::from_tag(0x7F),
            Err(EventError::UnknownKind { tag: 0x7F })
        ));
    }
}
