use std::collections::HashMap;

use crate::rewind::info::{RewindInfo, RewindInfoKind};
use crate::types::RewinderHandle;

/// Tolerance when comparing simulation times for equality.
pub const TIME_EPSILON: f64 = 1e-6;

/// The shared rewind history: every state snapshot, event and tick marker of
/// every rewinder, in one sequence strictly ordered by time, ties broken by
/// insertion order. A single backward or forward walk over it services all
/// rewinders consistently.
pub struct RewindQueue {
    infos: Vec<RewindInfo>,
}

impl RewindQueue {
    pub fn new() -> Self {
        Self { infos: Vec::new() }
    }

    /// Inserts keeping time order, scanning from the back: entries are
    /// almost always appended near the end, and equal-time records keep
    /// their insertion order.
    pub fn insert(&mut self, info: RewindInfo) {
        let mut index = self.infos.len();
        while index > 0 && self.infos[index - 1].time > info.time + TIME_EPSILON {
            index -= 1;
        }
        self.infos.insert(index, info);
    }

    pub fn entries(&self) -> &[RewindInfo] {
        &self.infos
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn clear(&mut self) {
        self.infos.clear();
    }

    /// Index of the newest confirmed state for `handle` at or before `time`.
    pub fn latest_confirmed_at_or_before(
        &self,
        handle: RewinderHandle,
        time: f64,
    ) -> Option<usize> {
        self.infos
            .iter()
            .enumerate()
            .rev()
            .find(|(_, info)| {
                info.time <= time + TIME_EPSILON && info.is_confirmed_state_for(handle)
            })
            .map(|(index, _)| index)
    }

    /// Earliest record time strictly after `time`, if any.
    pub fn next_time_after(&self, time: f64) -> Option<f64> {
        self.infos
            .iter()
            .map(|info| info.time)
            .find(|record_time| *record_time > time + TIME_EPSILON)
    }

    /// Indices of every record at `time` (within tolerance), oldest first.
    pub fn indices_at(&self, time: f64) -> Vec<usize> {
        self.infos
            .iter()
            .enumerate()
            .filter(|(_, info)| (info.time - time).abs() <= TIME_EPSILON)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&RewindInfo> {
        self.infos.get(index)
    }

    /// Swaps the stored buffer of a state record, used when an unconfirmed
    /// snapshot is discarded and replaced during replay.
    pub fn replace_state_buffer(&mut self, index: usize, fresh: Vec<u8>) {
        if let Some(info) = self.infos.get_mut(index) {
            if let RewindInfoKind::State { buffer, .. } = &mut info.kind {
                *buffer = fresh;
            }
        }
    }

    /// Drops records no rewind can still need, given that no client will
    /// ever request a rewind to before `horizon`.
    ///
    /// Kept are: everything at or after the horizon; per rewinder, the
    /// newest confirmed state at or before the horizon (the anchor a future
    /// rewind restarts from) and every event after that anchor; and tick
    /// markers back to the oldest anchor. Unconfirmed states before the
    /// horizon are always droppable: replay rebuilds them.
    pub fn compact(&mut self, horizon: f64) {
        let mut anchors: HashMap<RewinderHandle, f64> = HashMap::new();
        for info in &self.infos {
            if info.time > horizon + TIME_EPSILON {
                break;
            }
            if let RewindInfoKind::State {
                handle,
                confirmed: true,
                ..
            } = &info.kind
            {
                let anchor = anchors.entry(*handle).or_insert(info.time);
                if info.time > *anchor {
                    *anchor = info.time;
                }
            }
        }
        let oldest_anchor = anchors
            .values()
            .fold(f64::INFINITY, |oldest, anchor| oldest.min(*anchor));

        self.infos.retain(|info| {
            if info.time >= horizon - TIME_EPSILON {
                return true;
            }
            match &info.kind {
                RewindInfoKind::State {
                    handle,
                    confirmed: true,
                    ..
                } => anchors
                    .get(handle)
                    .is_some_and(|anchor| info.time >= *anchor - TIME_EPSILON),
                RewindInfoKind::State { .. } => false,
                RewindInfoKind::Event { handle, .. } => match anchors.get(handle) {
                    Some(anchor) => info.time > *anchor - TIME_EPSILON,
                    // No anchor for this rewinder yet: the event is still
                    // reachable from a full replay, keep it
                    None => true,
                },
                RewindInfoKind::TimeStep => info.time >= oldest_anchor - TIME_EPSILON,
            }
        });
    }
}

impl Default for RewindQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(time: f64) -> RewindInfo {
        RewindInfo::time_step_marker(time, 1.0 / 60.0)
    }

    #[test]
    fn insert_keeps_time_order() {
        let mut queue = RewindQueue::new();
        queue.insert(marker(1.0));
        queue.insert(marker(3.0));
        queue.insert(marker(2.0));
        let times: Vec<f64> = queue.entries().iter().map(|info| info.time).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn equal_times_keep_insertion_order() {
        let mut queue = RewindQueue::new();
        queue.insert(RewindInfo::state(1.0, 0.1, 0, vec![1], true));
        queue.insert(RewindInfo::event(1.0, 0.1, 0, vec![2]));
        queue.insert(RewindInfo::event(1.0, 0.1, 0, vec![3]));
        let buffers: Vec<u8> = queue
            .entries()
            .iter()
            .map(|info| match &info.kind {
                RewindInfoKind::State { buffer, .. } | RewindInfoKind::Event { buffer, .. } => {
                    buffer[0]
                }
                RewindInfoKind::TimeStep => 0,
            })
            .collect();
        assert_eq!(buffers, vec![1, 2, 3]);
    }

    #[test]
    fn latest_confirmed_lookup() {
        let mut queue = RewindQueue::new();
        queue.insert(RewindInfo::state(0.0, 0.1, 0, vec![], true));
        queue.insert(RewindInfo::state(1.0, 0.1, 0, vec![], true));
        queue.insert(RewindInfo::state(1.5, 0.1, 0, vec![], false));
        queue.insert(RewindInfo::state(2.0, 0.1, 0, vec![], true));

        let index = queue.latest_confirmed_at_or_before(0, 1.2).unwrap();
        assert_eq!(queue.get(index).unwrap().time, 1.0);
        // Unconfirmed snapshots never anchor a rewind
        let index = queue.latest_confirmed_at_or_before(0, 1.9).unwrap();
        assert_eq!(queue.get(index).unwrap().time, 1.0);
        assert!(queue.latest_confirmed_at_or_before(1, 2.0).is_none());
    }

    #[test]
    fn compaction_keeps_anchors_and_reachable_events() {
        let mut queue = RewindQueue::new();
        queue.insert(RewindInfo::state(0.0, 0.1, 0, vec![], true));
        queue.insert(RewindInfo::event(0.5, 0.1, 0, vec![]));
        queue.insert(RewindInfo::state(1.0, 0.1, 0, vec![], true));
        queue.insert(RewindInfo::event(1.5, 0.1, 0, vec![]));
        queue.insert(RewindInfo::state(1.5, 0.1, 0, vec![], false));
        queue.insert(marker(2.0));
        queue.insert(RewindInfo::state(3.0, 0.1, 0, vec![], true));

        queue.compact(2.0);

        // The t=1 anchor and the event after it survive; the t=0 state, the
        // t=0.5 event behind the anchor and the stale unconfirmed snapshot
        // do not.
        let kept: Vec<f64> = queue.entries().iter().map(|info| info.time).collect();
        assert_eq!(kept, vec![1.0, 1.5, 2.0, 3.0]);
        assert!(queue.latest_confirmed_at_or_before(0, 2.0).is_some());
    }
}
