//! Protocol contracts and the manager that schedules them.
//!
//! A [`Protocol`] is a self-contained network state machine (handshake,
//! lobby, game-event exchange, clock sync). Instances are owned by the
//! [`ProtocolManager`], which classifies inbound transport events, offers
//! them to the interested protocols, and drives two update loops: a
//! per-simulation-tick synchronous one and a background asynchronous one.
//! Lifecycle transitions happen only inside the manager, never on a
//! protocol's own initiative.

pub mod clock_sync;
pub mod error;
pub mod event;
pub mod game_events;
pub mod kind;
pub mod manager;
pub mod pending_delivery;

pub use clock_sync::{ClockEstimate, ClockSyncProtocol, SharedClock};
pub use error::EventError;
pub use event::{classify, EventKind, EventTarget, InboundEvent};
pub use game_events::{GameEventInbox, GameEventsProtocol, NetworkEvent};
pub use kind::{ProtocolKind, SYNCHRONOUS_BIT};
pub use manager::{ManagerConfig, ProtocolManager};
pub use pending_delivery::PendingDelivery;

/// Lifecycle state of a protocol. Transitions:
/// Created -> Running <-> Paused, and any non-terminal state -> Terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolState {
    Created,
    Running,
    Paused,
    Terminated,
}

/// A network sub-protocol managed by [`ProtocolManager`].
///
/// `update()` runs on the simulation thread and `asynchronous_update()` on
/// the manager's background thread; there is no ordering guarantee between
/// the two beyond "both eventually run", so state touched by both must be
/// protected by the implementation. Each instance lives behind its own
/// mutex, which covers the common case.
pub trait Protocol: Send {
    fn kind(&self) -> ProtocolKind;

    /// Called exactly once, on the Created -> Running transition.
    fn setup(&mut self) {}

    /// Called every simulation tick while Running.
    fn update(&mut self) {}

    /// Called every background-loop iteration while Running.
    fn asynchronous_update(&mut self) {}

    /// Offered a synchronously delivered event. Returns whether the event
    /// was consumed; unconsumed events are retried on later cycles until the
    /// retention window elapses.
    fn notify_event(&mut self, _event: &InboundEvent) -> bool {
        false
    }

    /// Offered an asynchronously delivered event.
    fn notify_event_asynchronous(&mut self, _event: &InboundEvent) -> bool {
        false
    }

    fn paused(&mut self) {}

    fn unpaused(&mut self) {}

    fn terminated(&mut self) {}
}
