//! Rewind/replay: a bounded recent window of the simulation that can be
//! wound back to a confirmed point and deterministically replayed forward
//! when authoritative data arrives late.

pub mod error;
pub mod info;
pub mod manager;
pub mod queue;
pub mod rewinder;

pub use error::RewindError;
pub use info::{RewindInfo, RewindInfoKind};
pub use manager::{RewindConfig, RewindManager, Simulation};
pub use queue::{RewindQueue, TIME_EPSILON};
pub use rewinder::{Rewinder, RewinderArena};
