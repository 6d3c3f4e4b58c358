use crate::types::RewinderHandle;

/// One timestamped record in the shared rewind history.
#[derive(Clone, Debug)]
pub struct RewindInfo {
    /// Simulation time at which this record was taken.
    pub time: f64,
    /// Time-step size in effect at that time.
    pub time_step: f64,
    pub kind: RewindInfoKind,
}

#[derive(Clone, Debug)]
pub enum RewindInfoKind {
    /// A state snapshot for one rewinder. Confirmed snapshots match the
    /// authoritative simulation (e.g. received from the server); unconfirmed
    /// ones are local predictions that get discarded and replaced during
    /// replay.
    State {
        handle: RewinderHandle,
        buffer: Vec<u8>,
        confirmed: bool,
    },
    /// A recorded event for one rewinder. Events are always replayed, never
    /// reconstructed from state.
    Event {
        handle: RewinderHandle,
        buffer: Vec<u8>,
    },
    /// Bare tick boundary, so replay steps land on the original frame times.
    TimeStep,
}

impl RewindInfo {
    pub fn state(
        time: f64,
        time_step: f64,
        handle: RewinderHandle,
        buffer: Vec<u8>,
        confirmed: bool,
    ) -> Self {
        Self {
            time,
            time_step,
            kind: RewindInfoKind::State {
                handle,
                buffer,
                confirmed,
            },
        }
    }

    pub fn event(time: f64, time_step: f64, handle: RewinderHandle, buffer: Vec<u8>) -> Self {
        Self {
            time,
            time_step,
            kind: RewindInfoKind::Event { handle, buffer },
        }
    }

    pub fn time_step_marker(time: f64, time_step: f64) -> Self {
        Self {
            time,
            time_step,
            kind: RewindInfoKind::TimeStep,
        }
    }

    pub fn is_confirmed_state_for(&self, handle: RewinderHandle) -> bool {
        matches!(
            self.kind,
            RewindInfoKind::State {
                handle: state_handle,
                confirmed: true,
                ..
            } if state_handle == handle
        )
    }
}
