//! Clock synchronization protocol.
//!
//! Periodically sends a timestamped probe to every known peer and matches
//! the echoed reply against the in-flight table to measure round-trip time
//! and clock offset. Estimates are smoothed exponentially and published
//! through a [`SharedClock`] handle so the simulation thread can read them
//! without touching the protocol itself; the rewind history retention
//! horizon is derived from these figures, and gameplay code uses them for a
//! shared notion of "now".
//!
//! This protocol is asynchronous-only: it does nothing on the simulation
//! tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::protocol::event::{EventKind, InboundEvent};
use crate::protocol::kind::ProtocolKind;
use crate::protocol::Protocol;
use crate::timer::Timer;
use crate::transport::Transport;
use crate::types::PeerId;

const MSG_PING: u8 = 1;
const MSG_PONG: u8 = 2;

/// How often a probe is sent to each peer.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Probes unanswered for this long are forgotten.
const PROBE_TIMEOUT_MICROS: u64 = 2_000_000;

/// Exponential smoothing factor for new samples.
const SMOOTHING: f64 = 0.1;

/// Smoothed per-peer measurements, in seconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClockEstimate {
    /// Smoothed round-trip time.
    pub rtt: f64,
    /// Estimated remote-minus-local clock offset.
    pub offset: f64,
    /// Number of samples folded into the estimate.
    pub samples: u32,
}

/// Cloneable read handle onto the estimates of a [`ClockSyncProtocol`].
#[derive(Clone, Default)]
pub struct SharedClock {
    peers: Arc<Mutex<HashMap<PeerId, ClockEstimate>>>,
}

impl SharedClock {
    pub fn estimate(&self, peer: PeerId) -> Option<ClockEstimate> {
        let Ok(peers) = self.peers.lock() else {
            return None;
        };
        peers.get(&peer).copied()
    }

    /// Worst smoothed round-trip time across all peers. This bounds how far
    /// back any peer may still ask the simulation to rewind.
    pub fn max_rtt(&self) -> Option<f64> {
        let Ok(peers) = self.peers.lock() else {
            return None;
        };
        peers
            .values()
            .filter(|estimate| estimate.samples > 0)
            .map(|estimate| estimate.rtt)
            .fold(None, |max, rtt| match max {
                Some(current) if current >= rtt => Some(current),
                _ => Some(rtt),
            })
    }

    /// Maps a local simulation time onto the peer's clock.
    pub fn remote_now(&self, peer: PeerId, local_now: f64) -> Option<f64> {
        self.estimate(peer)
            .filter(|estimate| estimate.samples > 0)
            .map(|estimate| local_now + estimate.offset)
    }

    fn fold_sample(&self, peer: PeerId, rtt: f64, offset: f64) {
        let Ok(mut peers) = self.peers.lock() else {
            return;
        };
        let estimate = peers.entry(peer).or_default();
        if estimate.samples == 0 {
            estimate.rtt = rtt;
            estimate.offset = offset;
        } else {
            estimate.rtt += (rtt - estimate.rtt) * SMOOTHING;
            estimate.offset += (offset - estimate.offset) * SMOOTHING;
        }
        estimate.samples += 1;
    }

    fn forget(&self, peer: PeerId) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(&peer);
        }
    }
}

pub struct ClockSyncProtocol {
    transport: Arc<dyn Transport>,
    peers: Vec<PeerId>,
    /// Probe id -> (target peer, local send time in micros).
    in_flight: HashMap<u32, (PeerId, u64)>,
    next_probe_id: u32,
    probe_timer: Timer,
    clock: SharedClock,
    epoch: Instant,
}

impl ClockSyncProtocol {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            peers: Vec::new(),
            in_flight: HashMap::new(),
            next_probe_id: 0,
            probe_timer: Timer::new(PROBE_INTERVAL),
            clock: SharedClock::default(),
            epoch: Instant::now(),
        }
    }

    /// Read handle for consumers outside the protocol mutex.
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn add_peer(&mut self, peer: PeerId) {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    pub fn remove_peer(&mut self, peer: PeerId) {
        self.peers.retain(|known| *known != peer);
        self.in_flight.retain(|_, (target, _)| *target != peer);
        self.clock.forget(peer);
    }

    fn local_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn send_probes(&mut self) {
        let now = self.local_micros();
        for index in 0..self.peers.len() {
            let peer = self.peers[index];
            let probe_id = self.next_probe_id;
            self.next_probe_id = self.next_probe_id.wrapping_add(1);
            self.in_flight.insert(probe_id, (peer, now));

            let mut payload = vec![ProtocolKind::ClockSync.to_tag(), MSG_PING];
            payload.extend_from_slice(&probe_id.to_le_bytes());
            payload.extend_from_slice(&now.to_le_bytes());
            self.transport.send(peer, payload, false);
        }
    }

    fn expire_probes(&mut self) {
        let now = self.local_micros();
        self.in_flight
            .retain(|_, (_, sent)| now.saturating_sub(*sent) < PROBE_TIMEOUT_MICROS);
    }

    fn handle_ping(&mut self, peer: PeerId, data: &[u8]) {
        let Some((probe_id, remote_send)) = read_probe(data) else {
            warn!("Too short clock probe from peer {}", peer);
            return;
        };
        let mut payload = vec![ProtocolKind::ClockSync.to_tag(), MSG_PONG];
        payload.extend_from_slice(&probe_id.to_le_bytes());
        payload.extend_from_slice(&remote_send.to_le_bytes());
        payload.extend_from_slice(&self.local_micros().to_le_bytes());
        self.transport.send(peer, payload, false);
    }

    fn handle_pong(&mut self, peer: PeerId, data: &[u8]) {
        let Some((probe_id, echoed_send, remote_micros)) = read_reply(data) else {
            warn!("Too short clock reply from peer {}", peer);
            return;
        };

        let Some((expected_peer, sent)) = self.in_flight.remove(&probe_id) else {
            // Late reply to an already expired probe
            return;
        };
        if expected_peer != peer || sent != echoed_send {
            warn!("Mismatched clock reply {} from peer {}", probe_id, peer);
            return;
        }

        let now = self.local_micros();
        let rtt = now.saturating_sub(sent) as f64 / 1_000_000.0;
        let offset = (remote_micros as f64 + rtt * 500_000.0 - now as f64) / 1_000_000.0;
        self.clock.fold_sample(peer, rtt, offset);
    }
}

fn read_probe(data: &[u8]) -> Option<(u32, u64)> {
    if data.len() < 12 {
        return None;
    }
    let mut id_bytes = [0u8; 4];
    id_bytes.copy_from_slice(&data[0..4]);
    let mut stamp_bytes = [0u8; 8];
    stamp_bytes.copy_from_slice(&data[4..12]);
    Some((u32::from_le_bytes(id_bytes), u64::from_le_bytes(stamp_bytes)))
}

/// Full pong body: echoed probe plus the remote send time.
fn read_reply(data: &[u8]) -> Option<(u32, u64, u64)> {
    let (probe_id, echoed_send) = read_probe(data)?;
    if data.len() < 20 {
        return None;
    }
    let mut remote_bytes = [0u8; 8];
    remote_bytes.copy_from_slice(&data[12..20]);
    Some((probe_id, echoed_send, u64::from_le_bytes(remote_bytes)))
}

impl Protocol for ClockSyncProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::ClockSync
    }

    fn asynchronous_update(&mut self) {
        if self.probe_timer.ringing() {
            self.probe_timer.reset();
            self.send_probes();
            self.expire_probes();
        }
    }

    fn notify_event_asynchronous(&mut self, event: &InboundEvent) -> bool {
        match event.kind {
            EventKind::Message => {}
            EventKind::Connected => {
                return false;
            }
            EventKind::Disconnected => {
                self.remove_peer(event.peer);
                return true;
            }
        }
        let Some((&message, body)) = event.data.split_first() else {
            warn!("Empty clock sync message from peer {}", event.peer);
            return true;
        };
        match message {
            MSG_PING => self.handle_ping(event.peer, body),
            MSG_PONG => self.handle_pong(event.peer, body),
            other => warn!("Unknown clock sync message type {}", other),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;
    impl Transport for NullTransport {
        fn send(&self, _peer: PeerId, _payload: Vec<u8>, _reliable: bool) {}
    }

    struct CapturingTransport {
        sent: Mutex<Vec<(PeerId, Vec<u8>)>>,
    }
    impl Transport for CapturingTransport {
        fn send(&self, peer: PeerId, payload: Vec<u8>, _reliable: bool) {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((peer, payload));
            }
        }
    }

    #[test]
    fn offset_estimation_from_synthetic_exchange() {
        let mut protocol = ClockSyncProtocol::new(Arc::new(NullTransport));
        protocol.add_peer(9);

        // Fake an in-flight probe sent at local t=0
        protocol.in_flight.insert(0, (9, 0));
        let now = protocol.local_micros();

        // Remote clock runs exactly 1s ahead of local, reply at remote
        // midpoint of the exchange
        let remote = now / 2 + 1_000_000;
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&remote.to_le_bytes());
        protocol.handle_pong(9, &body);

        let estimate = protocol.clock().estimate(9).unwrap();
        assert_eq!(estimate.samples, 1);
        assert!(estimate.rtt > 0.0);
        // Offset should land near one second, modulo the time this test
        // takes to execute
        assert!((estimate.offset - 1.0).abs() < 0.1);
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let transport = Arc::new(CapturingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let mut protocol = ClockSyncProtocol::new(Arc::clone(&transport) as Arc<dyn Transport>);

        let mut body = vec![MSG_PING];
        body.extend_from_slice(&7u32.to_le_bytes());
        body.extend_from_slice(&123u64.to_le_bytes());
        // Events reach the protocol with the routing tag already peeled
        let consumed = protocol.notify_event_asynchronous(&InboundEvent::message(9, body));
        assert!(consumed);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (peer, payload) = &sent[0];
        assert_eq!(*peer, 9);
        assert_eq!(payload[0], ProtocolKind::ClockSync.to_tag());
        assert_eq!(payload[1], MSG_PONG);
        // Echoed probe id and timestamp
        assert_eq!(&payload[2..6], &7u32.to_le_bytes());
        assert_eq!(&payload[6..14], &123u64.to_le_bytes());
    }

    #[test]
    fn truncated_reply_is_ignored() {
        let mut protocol = ClockSyncProtocol::new(Arc::new(NullTransport));
        protocol.in_flight.insert(0, (9, 0));

        // Probe header only, no remote timestamp
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        protocol.handle_pong(9, &body);

        assert!(protocol.clock().estimate(9).is_none());
        // The probe stays in flight for a complete retry
        assert!(protocol.in_flight.contains_key(&0));
    }

    #[test]
    fn disconnect_forgets_the_peer() {
        let mut protocol = ClockSyncProtocol::new(Arc::new(NullTransport));
        protocol.add_peer(4);
        protocol.clock.fold_sample(4, 0.05, 0.0);
        assert!(protocol.clock().estimate(4).is_some());

        protocol.notify_event_asynchronous(&InboundEvent::disconnected(4));
        assert!(protocol.clock().estimate(4).is_none());
        assert!(protocol.peers.is_empty());
    }
}
