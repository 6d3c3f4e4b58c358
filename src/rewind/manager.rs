//! Rewind/replay bookkeeping and the rewind algorithm itself.

use log::warn;

use crate::rewind::error::RewindError;
use crate::rewind::info::{RewindInfo, RewindInfoKind};
use crate::rewind::queue::{RewindQueue, TIME_EPSILON};
use crate::rewind::rewinder::{Rewinder, RewinderArena};
use crate::types::{HostType, RewinderHandle};

/// Tuning knobs for a [`RewindManager`].
pub struct RewindConfig {
    /// Minimum simulation time between per-tick snapshot captures.
    pub state_save_interval: f64,
    /// Ordinary physics step size; replay never advances further than this
    /// in one step.
    pub default_time_step: f64,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            state_save_interval: 0.1,
            default_time_step: 1.0 / 60.0,
        }
    }
}

/// The ordinary per-tick advancement of the simulation, re-driven during
/// replay. Implemented outside this core by whatever owns physics and
/// gameplay.
pub trait Simulation {
    fn advance(&mut self, rewinders: &mut RewinderArena, dt: f64);
}

/// Owns the time-ordered history of all rewinder snapshots and events, and
/// performs rewind-then-replay when authoritative data arrives late.
///
/// Everything here runs on the simulation thread. [`rewind_to`] executes
/// synchronously and is not time-sliced: a large rewind window produces one
/// correspondingly large stall, by design.
///
/// [`rewind_to`]: RewindManager::rewind_to
pub struct RewindManager {
    host_type: HostType,
    config: RewindConfig,
    rewinders: RewinderArena,
    queue: RewindQueue,
    current_time: f64,
    time_step: f64,
    last_saved_state: f64,
    is_rewinding: bool,
    overall_state_size: usize,
}

impl RewindManager {
    pub fn new(host_type: HostType, config: RewindConfig) -> Self {
        let time_step = config.default_time_step;
        Self {
            host_type,
            config,
            rewinders: RewinderArena::new(),
            queue: RewindQueue::new(),
            current_time: 0.0,
            time_step,
            last_saved_state: -9999.9, // forces an initial state save
            is_rewinding: false,
            overall_state_size: 0,
        }
    }

    pub fn register_rewinder(&mut self, rewinder: Box<dyn Rewinder>) -> RewinderHandle {
        self.rewinders.insert(rewinder)
    }

    /// Direct access to the registered rewinders, for the simulation's own
    /// per-tick update.
    pub fn rewinders_mut(&mut self) -> &mut RewinderArena {
        &mut self.rewinders
    }

    /// Sets the time stamped onto all states and events recorded this tick,
    /// so records taken before and after the world clock moves share one
    /// timestamp.
    pub fn set_current_time(&mut self, time: f64, time_step: f64) {
        self.current_time = time;
        self.time_step = time_step;
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn is_rewinding(&self) -> bool {
        self.is_rewinding
    }

    /// Total bytes of state buffers recorded so far.
    pub fn overall_state_size(&self) -> usize {
        self.overall_state_size
    }

    pub fn history_len(&self) -> usize {
        self.queue.len()
    }

    /// Adds the tick-boundary marker for the current time. Time zero gets
    /// only one marker no matter how many ticks run before the clock starts.
    pub fn add_time_step(&mut self) {
        if self.current_time > 0.0 || self.queue.is_empty() {
            self.queue.insert(RewindInfo::time_step_marker(
                self.current_time,
                self.time_step,
            ));
        }
    }

    /// Per-tick snapshot capture. The server records confirmed states (it
    /// is the authority); a client records unconfirmed predictions that
    /// speed up later rewinds. At most one snapshot per rewinder is kept
    /// per timestamp: a newer capture at the same time replaces the old
    /// unconfirmed one.
    pub fn update(&mut self, _dt: f64) {
        if self.rewinders.is_empty() || self.is_rewinding {
            return;
        }
        if self.current_time - self.last_saved_state < self.config.state_save_interval {
            return;
        }

        let confirmed = self.host_type == HostType::Server;
        for handle in self.rewinders.handles() {
            let Some(rewinder) = self.rewinders.get_mut(handle) else {
                continue;
            };
            let Some(buffer) = rewinder.save_state() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }
            self.overall_state_size += buffer.len();
            self.record_state(handle, buffer, confirmed, self.current_time);
        }
        self.last_saved_state = self.current_time;
    }

    fn record_state(&mut self, handle: RewinderHandle, buffer: Vec<u8>, confirmed: bool, time: f64) {
        if !confirmed {
            // Retention policy for unconfirmed snapshots: only the newest
            // one per rewinder per timestamp survives
            let stale: Vec<usize> = self
                .queue
                .indices_at(time)
                .into_iter()
                .filter(|index| {
                    matches!(
                        self.queue.get(*index).map(|info| &info.kind),
                        Some(RewindInfoKind::State {
                            handle: state_handle,
                            confirmed: false,
                            ..
                        }) if *state_handle == handle
                    )
                })
                .collect();
            if let Some(index) = stale.first() {
                self.queue.replace_state_buffer(*index, buffer);
                return;
            }
        }
        self.queue
            .insert(RewindInfo::state(time, self.time_step, handle, buffer, confirmed));
    }

    /// Records a local event for a rewinder by asking it to capture the
    /// event data. Dropped with an error while a rewind is replaying, since
    /// the replay itself re-fires events.
    pub fn add_event(&mut self, handle: RewinderHandle) -> Result<(), RewindError> {
        if self.is_rewinding {
            warn!("Discarding event for rewinder {} recorded mid-rewind", handle);
            return Err(RewindError::RewindInProgress);
        }
        let Some(rewinder) = self.rewinders.get_mut(handle) else {
            return Err(RewindError::UnknownRewinder { handle });
        };
        if let Some(buffer) = rewinder.save_event() {
            self.queue.insert(RewindInfo::event(
                self.current_time,
                self.time_step,
                handle,
                buffer,
            ));
        }
        Ok(())
    }

    /// Records an event received from the network, stamped with the sender's
    /// simulation time.
    pub fn add_network_event(
        &mut self,
        handle: RewinderHandle,
        buffer: Vec<u8>,
        time: f64,
    ) -> Result<(), RewindError> {
        if !self.rewinders.contains(handle) {
            return Err(RewindError::UnknownRewinder { handle });
        }
        self.queue
            .insert(RewindInfo::event(time, self.time_step, handle, buffer));
        Ok(())
    }

    /// Records an authoritative state snapshot received from the network.
    pub fn add_network_state(
        &mut self,
        handle: RewinderHandle,
        buffer: Vec<u8>,
        time: f64,
    ) -> Result<(), RewindError> {
        if !self.rewinders.contains(handle) {
            return Err(RewindError::UnknownRewinder { handle });
        }
        self.overall_state_size += buffer.len();
        self.queue
            .insert(RewindInfo::state(time, self.time_step, handle, buffer, true));
        Ok(())
    }

    /// Drops history that no rewind can still need. `oldest_needed_time` is
    /// typically derived from peer round-trip estimates.
    pub fn compact(&mut self, oldest_needed_time: f64) {
        self.queue.compact(oldest_needed_time);
    }

    /// Latest time at or before `target_time` from which every rewinder can
    /// be restored. A rewinder with no confirmed history at all pulls the
    /// restart point back to time zero (full replay); if nothing has
    /// confirmed history, there is nothing to restart from.
    fn restart_time(&self, target_time: f64) -> Option<f64> {
        let handles = self.rewinders.handles();
        if handles.is_empty() {
            return None;
        }
        let mut t_min = target_time;
        let mut any_confirmed = false;
        for handle in handles {
            match self.queue.latest_confirmed_at_or_before(handle, target_time) {
                Some(index) => {
                    if let Some(info) = self.queue.get(index) {
                        t_min = t_min.min(info.time);
                        any_confirmed = true;
                    }
                }
                None => {
                    t_min = t_min.min(0.0);
                }
            }
        }
        if any_confirmed {
            Some(t_min.max(0.0))
        } else {
            None
        }
    }

    /// Winds the simulation back to `target_time` and deterministically
    /// replays it forward to the present:
    ///
    /// 1. finds the restart point `t_min` (see [`restart_time`]);
    /// 2. walks the history backward from now to `t_min`, undoing every
    ///    traversed state and event;
    /// 3. restores every rewinder to its newest confirmed state at or
    ///    before `t_min`;
    /// 4. steps forward again, re-applying confirmed states, replacing
    ///    unconfirmed snapshots with freshly recorded ones, re-firing
    ///    events, and advancing the simulation through `simulation` in
    ///    steps bounded by the recorded tick boundaries and the default
    ///    step size.
    ///
    /// With no confirmed history before `target_time` the rewind degrades
    /// to a no-op.
    ///
    /// [`restart_time`]: RewindManager::restart_time
    pub fn rewind_to(&mut self, target_time: f64, simulation: &mut dyn Simulation) {
        if self.is_rewinding {
            warn!("Ignoring rewind to {} while already rewinding", target_time);
            return;
        }
        let now = self.current_time;
        let Some(t_min) = self.restart_time(target_time) else {
            warn!(
                "Cannot rewind to {}: no confirmed history for any rewinder",
                target_time
            );
            return;
        };
        self.is_rewinding = true;

        // Undo walk, newest first. States at exactly t_min are the restore
        // anchors and stay untouched; events at t_min are undone so the
        // replay re-fires them exactly once.
        for index in (0..self.queue.len()).rev() {
            let Some(info) = self.queue.get(index) else {
                continue;
            };
            match &info.kind {
                RewindInfoKind::State { handle, buffer, .. }
                    if info.time > t_min + TIME_EPSILON =>
                {
                    let (handle, buffer) = (*handle, buffer.clone());
                    if let Some(rewinder) = self.rewinders.get_mut(handle) {
                        rewinder.undo_state(&buffer);
                    }
                }
                RewindInfoKind::Event { handle, buffer }
                    if info.time > t_min - TIME_EPSILON =>
                {
                    let (handle, buffer) = (*handle, buffer.clone());
                    if let Some(rewinder) = self.rewinders.get_mut(handle) {
                        rewinder.undo_event(&buffer);
                    }
                }
                _ => {}
            }
            if self
                .queue
                .get(index)
                .is_some_and(|info| info.time < t_min - TIME_EPSILON)
            {
                break;
            }
        }

        // Restore the confirmed baseline
        for handle in self.rewinders.handles() {
            let Some(index) = self.queue.latest_confirmed_at_or_before(handle, t_min) else {
                continue;
            };
            let Some(info) = self.queue.get(index) else {
                continue;
            };
            if let RewindInfoKind::State { buffer, .. } = &info.kind {
                let buffer = buffer.clone();
                if let Some(rewinder) = self.rewinders.get_mut(handle) {
                    rewinder.restore_state(&buffer);
                }
            }
        }

        // Forward replay
        let mut time = t_min;
        loop {
            self.current_time = time;
            self.apply_records_at(time, t_min);

            if time >= now - TIME_EPSILON {
                break;
            }
            let step_end = (time + self.config.default_time_step).min(now);
            let next = match self.queue.next_time_after(time) {
                Some(record_time) => record_time.min(step_end),
                None => step_end,
            };
            simulation.advance(&mut self.rewinders, next - time);
            time = next;
        }

        self.current_time = now;
        self.is_rewinding = false;
    }

    /// Applies every record stamped `time` while stepping forward.
    fn apply_records_at(&mut self, time: f64, t_min: f64) {
        let at_restart = (time - t_min).abs() <= TIME_EPSILON;
        for index in self.queue.indices_at(time) {
            let Some(info) = self.queue.get(index) else {
                continue;
            };
            match &info.kind {
                RewindInfoKind::Event { handle, buffer } => {
                    let (handle, buffer) = (*handle, buffer.clone());
                    if let Some(rewinder) = self.rewinders.get_mut(handle) {
                        rewinder.rewind_to_event(&buffer);
                    }
                }
                // States at the restart time were just restored
                RewindInfoKind::State { .. } if at_restart => {}
                RewindInfoKind::State {
                    handle,
                    buffer,
                    confirmed: true,
                } => {
                    let (handle, buffer) = (*handle, buffer.clone());
                    if let Some(rewinder) = self.rewinders.get_mut(handle) {
                        rewinder.rewind_to_state(&buffer);
                    }
                }
                // A stale prediction: discard it and record what the
                // corrected replay actually produced
                RewindInfoKind::State {
                    handle,
                    confirmed: false,
                    ..
                } => {
                    let handle = *handle;
                    let fresh = self
                        .rewinders
                        .get_mut(handle)
                        .and_then(|rewinder| rewinder.save_state());
                    if let Some(fresh) = fresh {
                        self.queue.replace_state_buffer(index, fresh);
                    }
                }
                RewindInfoKind::TimeStep => {}
            }
        }
    }
}
