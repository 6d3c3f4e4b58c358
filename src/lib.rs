//! # Rollnet
//! Network synchronization core for real-time multiplayer simulations: a
//! protocol-execution engine scheduling concurrent network sub-protocols
//! across a fixed-tick simulation thread and a background network thread,
//! plus a rewind/rollback mechanism that winds the shared simulation back to
//! a confirmed point and deterministically replays it when authoritative
//! data arrives late.
//!
//! Transport, physics and rendering live outside this crate; they plug in
//! through the [`Transport`], [`Rewinder`] and [`Simulation`] seams.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod context;
mod protocol;
mod rewind;
mod timer;
mod transport;
mod types;

pub use context::NetContext;
pub use protocol::{
    classify, ClockEstimate, ClockSyncProtocol, EventError, EventKind, EventTarget, GameEventInbox,
    GameEventsProtocol, InboundEvent, ManagerConfig, NetworkEvent, PendingDelivery, Protocol,
    ProtocolKind, ProtocolManager, ProtocolState, SharedClock, SYNCHRONOUS_BIT,
};
pub use protocol::manager::SharedProtocol;
pub use rewind::{
    RewindConfig, RewindError, RewindInfo, RewindInfoKind, RewindManager, RewindQueue, Rewinder,
    RewinderArena, Simulation, TIME_EPSILON,
};
pub use timer::Timer;
pub use transport::Transport;
pub use types::{HostType, PeerId, ProtocolId, RewinderHandle};
