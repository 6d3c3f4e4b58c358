use std::sync::Arc;

use crate::protocol::clock_sync::SharedClock;
use crate::protocol::game_events::GameEventInbox;
use crate::protocol::manager::{ManagerConfig, ProtocolManager};
use crate::rewind::manager::{RewindConfig, RewindManager, Simulation};
use crate::rewind::queue::TIME_EPSILON;
use crate::types::HostType;

/// Extra slack added to the round-trip-derived retention horizon, in
/// seconds, to absorb jitter the smoothed estimate has not caught up with.
const RETENTION_MARGIN: f64 = 0.5;

/// The one explicit entry point into the synchronization core.
///
/// Owns the protocol manager and the rewind manager for one simulation and
/// is threaded through every simulation/network entry point; create it at
/// session start, call [`tick`](Self::tick) once per fixed simulation tick,
/// and [`shutdown`](Self::shutdown) it when the session ends.
pub struct NetContext {
    host_type: HostType,
    protocols: Arc<ProtocolManager>,
    rewind: RewindManager,
    game_events: Option<GameEventInbox>,
}

impl NetContext {
    pub fn new(
        host_type: HostType,
        manager_config: ManagerConfig,
        rewind_config: RewindConfig,
    ) -> Self {
        Self {
            host_type,
            protocols: ProtocolManager::new(manager_config),
            rewind: RewindManager::new(host_type, rewind_config),
            game_events: None,
        }
    }

    pub fn host_type(&self) -> HostType {
        self.host_type
    }

    pub fn protocols(&self) -> &Arc<ProtocolManager> {
        &self.protocols
    }

    pub fn rewind(&mut self) -> &mut RewindManager {
        &mut self.rewind
    }

    pub fn rewind_ref(&self) -> &RewindManager {
        &self.rewind
    }

    /// Wires the inbox of a started game-events protocol into the per-tick
    /// pipeline, so received network events flow into the rewind history.
    pub fn attach_game_events(&mut self, inbox: GameEventInbox) {
        self.game_events = Some(inbox);
    }

    /// One fixed simulation tick: runs the synchronous protocol update,
    /// merges received game events into the history, captures the per-tick
    /// snapshots at the current time, then moves the rewind clock forward.
    /// The caller advances physics/gameplay by `dt` after this returns.
    ///
    /// Merged events stamped at or after the current time are applied to the
    /// live simulation here; an event stamped in the past means a peer's
    /// confirmed data arrived late, so the tick rewinds to the earliest such
    /// stamp and replays forward with the event in place.
    pub fn tick(&mut self, dt: f64, simulation: &mut dyn Simulation) {
        self.protocols.update();
        self.rewind.add_time_step();

        let events = match &self.game_events {
            Some(inbox) => inbox.drain(),
            None => Vec::new(),
        };
        let now = self.rewind.current_time();
        let mut rewind_target: Option<f64> = None;
        for event in events {
            // An event for an unknown rewinder is the sender's problem
            if self
                .rewind
                .add_network_event(event.handle, event.payload.clone(), event.time)
                .is_err()
            {
                continue;
            }
            if event.time < now - TIME_EPSILON {
                rewind_target = Some(match rewind_target {
                    Some(target) => target.min(event.time),
                    None => event.time,
                });
            } else if let Some(rewinder) = self.rewind.rewinders_mut().get_mut(event.handle) {
                // Stamped inside the step that is about to run
                rewinder.rewind_to_event(&event.payload);
            }
        }
        if let Some(target) = rewind_target {
            self.rewind.rewind_to(target, simulation);
        }

        self.rewind.update(dt);
        let time = self.rewind.current_time() + dt;
        self.rewind.set_current_time(time, dt);
    }

    /// Drops rewind history older than any peer can still ask for, based on
    /// the clock-sync round-trip estimates. Without an estimate yet, keeps
    /// everything.
    pub fn compact_history(&mut self, clock: &SharedClock) {
        let Some(max_rtt) = clock.max_rtt() else {
            return;
        };
        let horizon = self.rewind.current_time() - (max_rtt + RETENTION_MARGIN);
        if horizon > 0.0 {
            self.rewind.compact(horizon);
        }
    }

    /// Tears the networking side down. After this returns no protocol
    /// callback fires again.
    pub fn shutdown(&mut self) {
        self.protocols.abort();
    }
}
