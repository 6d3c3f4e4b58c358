//! Game-event exchange protocol.
//!
//! Carries timestamped, per-rewinder event payloads (control-input
//! transitions and similar happenings that can never be derived from state
//! snapshots). Inbound events are delivered synchronously and parked in a
//! shared inbox; the simulation thread drains the inbox once per tick and
//! feeds the entries into the rewind history as confirmed events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::protocol::event::{EventKind, InboundEvent};
use crate::protocol::kind::{ProtocolKind, SYNCHRONOUS_BIT};
use crate::protocol::Protocol;
use crate::transport::Transport;
use crate::types::{PeerId, RewinderHandle};

/// A confirmed event for one rewinder, as received from the network.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkEvent {
    pub handle: RewinderHandle,
    pub time: f64,
    pub payload: Vec<u8>,
}

/// Cloneable handle onto the received-event queue of a
/// [`GameEventsProtocol`].
#[derive(Clone, Default)]
pub struct GameEventInbox {
    queue: Arc<Mutex<VecDeque<NetworkEvent>>>,
}

impl GameEventInbox {
    /// Takes every queued event, oldest first.
    pub fn drain(&self) -> Vec<NetworkEvent> {
        let Ok(mut queue) = self.queue.lock() else {
            return Vec::new();
        };
        queue.drain(..).collect()
    }

    fn push(&self, event: NetworkEvent) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(event);
        }
    }
}

pub struct GameEventsProtocol {
    transport: Arc<dyn Transport>,
    inbox: GameEventInbox,
}

impl GameEventsProtocol {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            inbox: GameEventInbox::default(),
        }
    }

    pub fn inbox(&self) -> GameEventInbox {
        self.inbox.clone()
    }

    /// Sends one rewinder event to a peer. Framed as
    /// `[tag|sync][handle][time][payload]`; delivery on the receiving side
    /// is synchronous so the event enters the rewind history on the
    /// simulation thread.
    pub fn send_event(&self, peer: PeerId, handle: RewinderHandle, time: f64, payload: &[u8]) {
        let mut framed = vec![ProtocolKind::GameEvents.to_tag() | SYNCHRONOUS_BIT];
        framed.extend_from_slice(&handle.to_le_bytes());
        framed.extend_from_slice(&time.to_le_bytes());
        framed.extend_from_slice(payload);
        self.transport.send(peer, framed, true);
    }
}

impl Protocol for GameEventsProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::GameEvents
    }

    fn notify_event(&mut self, event: &InboundEvent) -> bool {
        match event.kind {
            EventKind::Message => {}
            EventKind::Connected => {
                return false;
            }
            EventKind::Disconnected => {
                return true;
            }
        }
        if event.data.len() < 12 {
            warn!("Too short game event from peer {}", event.peer);
            return true;
        }
        let mut handle_bytes = [0u8; 4];
        handle_bytes.copy_from_slice(&event.data[0..4]);
        let mut time_bytes = [0u8; 8];
        time_bytes.copy_from_slice(&event.data[4..12]);
        self.inbox.push(NetworkEvent {
            handle: RewinderHandle::from_le_bytes(handle_bytes),
            time: f64::from_le_bytes(time_bytes),
            payload: event.data[12..].to_vec(),
        });
        true
    }
}
