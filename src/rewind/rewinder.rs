use crate::types::RewinderHandle;

/// Capability implemented by a simulation entity that can take part in
/// rewind/replay. State snapshots are opaque buffers: the core never looks
/// inside them, it only stores and hands them back.
///
/// States can be reconstructed by replaying the simulation, so old ones may
/// be discarded; events (control-input transitions and the like) can never
/// be derived from state and are always replayed.
pub trait Rewinder {
    /// Captures the entity's current state. Returning None (or an empty
    /// buffer) skips the snapshot for this entity this tick.
    fn save_state(&mut self) -> Option<Vec<u8>>;

    /// Jumps the entity to a previously captured snapshot. Called once at
    /// the start of a rewind, with the confirmed state at the restart time.
    fn restore_state(&mut self, buffer: &[u8]);

    /// Re-applies a confirmed snapshot while stepping forward through the
    /// replay.
    fn rewind_to_state(&mut self, buffer: &[u8]);

    /// Steps one recorded state backward during the undo walk. Most
    /// entities need no bookkeeping here.
    fn undo_state(&mut self, _buffer: &[u8]) {}

    /// Captures a just-occurred event (e.g. a control transition). Returning
    /// None records nothing.
    fn save_event(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Unwinds a recorded event during the undo walk.
    fn undo_event(&mut self, _buffer: &[u8]) {}

    /// Re-applies a recorded event while stepping forward through the
    /// replay.
    fn rewind_to_event(&mut self, _buffer: &[u8]) {}
}

/// Slab of registered rewinders, addressed by stable integer handles.
///
/// The history only ever refers to entities through these handles, and
/// entities never hold a reference back to the manager, so there are no
/// ownership cycles between the two.
pub struct RewinderArena {
    slots: Vec<Option<Box<dyn Rewinder>>>,
}

impl RewinderArena {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn insert(&mut self, rewinder: Box<dyn Rewinder>) -> RewinderHandle {
        let handle = self.slots.len() as RewinderHandle;
        self.slots.push(Some(rewinder));
        handle
    }

    pub fn remove(&mut self, handle: RewinderHandle) -> Option<Box<dyn Rewinder>> {
        self.slots.get_mut(handle as usize)?.take()
    }

    pub fn get_mut(&mut self, handle: RewinderHandle) -> Option<&mut dyn Rewinder> {
        match self.slots.get_mut(handle as usize) {
            Some(Some(rewinder)) => Some(rewinder.as_mut()),
            _ => None,
        }
    }

    pub fn contains(&self, handle: RewinderHandle) -> bool {
        matches!(self.slots.get(handle as usize), Some(Some(_)))
    }

    /// Handles of every registered rewinder, in registration order.
    pub fn handles(&self) -> Vec<RewinderHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| index as RewinderHandle)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_none())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Default for RewinderArena {
    fn default() -> Self {
        Self::new()
    }
}
