use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::protocol::event::{classify, EventTarget, InboundEvent};
use crate::protocol::kind::ProtocolKind;
use crate::protocol::pending_delivery::PendingDelivery;
use crate::protocol::{Protocol, ProtocolState};
use crate::types::ProtocolId;

/// Tuning knobs for a [`ProtocolManager`].
pub struct ManagerConfig {
    /// Sleep between background-loop iterations.
    pub poll_interval: Duration,
    /// How long an undelivered event is retried before being dropped.
    pub event_retention: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            event_retention: Duration::from_secs(5),
        }
    }
}

/// Protocols live behind their own mutex so that the simulation thread and
/// the background thread can both call into them without external
/// coordination.
pub type SharedProtocol = Arc<Mutex<dyn Protocol>>;

struct LiveProtocol {
    id: ProtocolId,
    kind: ProtocolKind,
    state: ProtocolState,
    protocol: SharedProtocol,
}

/// A lifecycle intent, consumed once by the background loop.
enum ProtocolRequest {
    Start {
        id: ProtocolId,
        protocol: SharedProtocol,
    },
    Pause(ProtocolId),
    Unpause(ProtocolId),
    Terminate(ProtocolId),
}

/// Owns every live [`Protocol`], routes inbound transport events to them and
/// drives their two update loops.
///
/// One background thread is spawned per manager in [`ProtocolManager::new`]
/// and runs [`asynchronous_update`](Self::asynchronous_update) in a tight
/// poll for the manager's whole lifetime; the simulation loop is expected to
/// call [`update`](Self::update) once per fixed tick. The single shutdown
/// path is [`abort`](Self::abort).
///
/// Lock layout: each shared container (live set, delivery queue, request
/// queue, id counter) has its own mutex, and none of them is held while a
/// protocol callback runs. A manager-wide `lifecycle` mutex is held while a
/// lifecycle request is applied and while an update phase runs over the live
/// set, which keeps start/terminate atomic with respect to the update loops:
/// no protocol sees `update()` or `asynchronous_update()` before `setup()`
/// or after `terminated()`.
pub struct ProtocolManager {
    config: ManagerConfig,
    live: Mutex<Vec<LiveProtocol>>,
    deliveries: Mutex<Vec<PendingDelivery>>,
    requests: Mutex<VecDeque<ProtocolRequest>>,
    next_id: Mutex<ProtocolId>,
    lifecycle: Mutex<()>,
    stop: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            live: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
            requests: Mutex::new(VecDeque::new()),
            next_id: Mutex::new(0),
            lifecycle: Mutex::new(()),
            stop: AtomicBool::new(false),
            background: Mutex::new(None),
        });

        let worker = Arc::clone(&manager);
        let handle = thread::spawn(move || {
            while !worker.stop.load(Ordering::SeqCst) {
                worker.asynchronous_update();
                thread::sleep(worker.config.poll_interval);
            }
        });
        if let Ok(mut background) = manager.background.lock() {
            *background = Some(handle);
        }

        manager
    }

    fn next_protocol_id(&self) -> ProtocolId {
        let Ok(mut next_id) = self.next_id.lock() else {
            return ProtocolId::MAX;
        };
        let id = *next_id;
        *next_id += 1;
        id
    }

    /// Asks the manager to start a protocol. The request is queued and
    /// applied by the background loop; the assigned id is returned
    /// immediately.
    pub fn request_start(&self, protocol: SharedProtocol) -> ProtocolId {
        let id = self.next_protocol_id();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push_back(ProtocolRequest::Start { id, protocol });
        }
        id
    }

    /// Asks the manager to pause a running protocol.
    pub fn request_pause(&self, id: ProtocolId) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push_back(ProtocolRequest::Pause(id));
        }
    }

    /// Asks the manager to unpause a paused protocol.
    pub fn request_unpause(&self, id: ProtocolId) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push_back(ProtocolRequest::Unpause(id));
        }
    }

    /// Asks the manager to terminate a protocol. Idempotent: a second call
    /// while a terminate for the same id is already queued is a no-op.
    pub fn request_terminate(&self, id: ProtocolId) {
        let Ok(mut requests) = self.requests.lock() else {
            return;
        };
        let already_queued = requests
            .iter()
            .any(|request| matches!(request, ProtocolRequest::Terminate(queued) if *queued == id));
        if !already_queued {
            requests.push_back(ProtocolRequest::Terminate(id));
        }
    }

    /// Entry point for inbound transport events. Classifies the event,
    /// collects the running protocols of the target type and queues a
    /// delivery for them. Events with no destination are dropped with a
    /// warning.
    pub fn propagate_event(&self, mut event: InboundEvent) {
        let (target, synchronous) = match classify(&mut event) {
            Ok(classified) => classified,
            Err(error) => {
                warn!("Dropping inbound event from peer {}: {}", event.peer, error);
                return;
            }
        };

        let candidates = self.collect_candidates(target);
        if candidates.is_empty() {
            warn!(
                "Received a {:?} event for {:?} that has no destination protocol",
                event.kind, target
            );
            debug!("Undeliverable payload: {:?}", event.data);
            return;
        }

        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.push(PendingDelivery::new(event, synchronous, candidates));
        }
    }

    fn collect_candidates(&self, target: EventTarget) -> Vec<ProtocolId> {
        let Ok(live) = self.live.lock() else {
            return Vec::new();
        };
        live.iter()
            .filter(|entry| entry.state == ProtocolState::Running)
            .filter(|entry| match target {
                EventTarget::Kind(kind) => entry.kind == kind,
                EventTarget::Broadcast => true,
            })
            .map(|entry| entry.id)
            .collect()
    }

    fn shared_protocol(&self, id: ProtocolId) -> Option<SharedProtocol> {
        let Ok(live) = self.live.lock() else {
            return None;
        };
        live.iter()
            .find(|entry| entry.id == id)
            .map(|entry| Arc::clone(&entry.protocol))
    }

    /// Offers a pending delivery to each remaining candidate. Returns true
    /// once the delivery can be discarded: every candidate consumed it, or
    /// it exceeded the retention window.
    fn offer_delivery(&self, delivery: &mut PendingDelivery, synchronous: bool) -> bool {
        delivery.candidates.retain(|id| {
            let Some(shared) = self.shared_protocol(*id) else {
                // Protocol terminated while the event was queued
                return false;
            };
            let Ok(mut protocol) = shared.lock() else {
                return false;
            };
            let consumed = if synchronous {
                protocol.notify_event(&delivery.event)
            } else {
                protocol.notify_event_asynchronous(&delivery.event)
            };
            !consumed
        });

        if delivery.candidates.is_empty() {
            return true;
        }
        if delivery.arrival.elapsed() >= self.config.event_retention {
            warn!(
                "Dropping {:?} event from peer {} after retention window, {} protocols never consumed it",
                delivery.event.kind,
                delivery.event.peer,
                delivery.candidates.len()
            );
            return true;
        }
        false
    }

    /// Delivers the queued events of one scheduling domain. The queue lock
    /// is released while protocols are notified, so consumers may propagate
    /// further events without deadlocking.
    fn process_deliveries(&self, synchronous: bool) {
        let mut batch = {
            let Ok(mut deliveries) = self.deliveries.lock() else {
                return;
            };
            let mut batch = Vec::new();
            let mut index = 0;
            while index < deliveries.len() {
                if deliveries[index].synchronous == synchronous {
                    batch.push(deliveries.remove(index));
                } else {
                    index += 1;
                }
            }
            batch
        };

        batch.retain_mut(|delivery| !self.offer_delivery(delivery, synchronous));

        if batch.is_empty() {
            return;
        }
        // Requeue the unfinished ones ahead of anything that arrived while
        // we were delivering, preserving arrival order
        if let Ok(mut deliveries) = self.deliveries.lock() {
            batch.extend(deliveries.drain(..));
            *deliveries = batch;
        }
    }

    fn running_protocols(&self) -> Vec<SharedProtocol> {
        let Ok(live) = self.live.lock() else {
            return Vec::new();
        };
        live.iter()
            .filter(|entry| entry.state == ProtocolState::Running)
            .map(|entry| Arc::clone(&entry.protocol))
            .collect()
    }

    /// Simulation-thread update, to be called once per fixed tick: delivers
    /// due synchronous events, then updates every running protocol.
    pub fn update(&self) {
        self.process_deliveries(true);

        let Ok(_lifecycle) = self.lifecycle.lock() else {
            return;
        };
        for shared in self.running_protocols() {
            if let Ok(mut protocol) = shared.lock() {
                protocol.update();
            }
        }
    }

    /// Background-thread update: delivers due asynchronous events, updates
    /// every running protocol, then drains the lifecycle request queue.
    ///
    /// Requests are applied one at a time with the request queue unlocked,
    /// so a transition handler may enqueue follow-up requests (terminating
    /// one protocol frequently unpauses another).
    pub fn asynchronous_update(&self) {
        self.process_deliveries(false);

        {
            let Ok(_lifecycle) = self.lifecycle.lock() else {
                return;
            };
            for shared in self.running_protocols() {
                if let Ok(mut protocol) = shared.lock() {
                    protocol.asynchronous_update();
                }
            }
        }

        loop {
            let request = {
                let Ok(mut requests) = self.requests.lock() else {
                    return;
                };
                match requests.pop_front() {
                    Some(request) => request,
                    None => break,
                }
            };
            let Ok(_lifecycle) = self.lifecycle.lock() else {
                return;
            };
            match request {
                ProtocolRequest::Start { id, protocol } => self.start_protocol(id, protocol),
                ProtocolRequest::Pause(id) => self.pause_protocol(id),
                ProtocolRequest::Unpause(id) => self.unpause_protocol(id),
                ProtocolRequest::Terminate(id) => self.terminate_protocol(id),
            }
        }
    }

    fn start_protocol(&self, id: ProtocolId, protocol: SharedProtocol) {
        let kind = {
            let Ok(mut guard) = protocol.lock() else {
                return;
            };
            let kind = guard.kind();
            guard.setup();
            kind
        };

        let Ok(mut live) = self.live.lock() else {
            return;
        };
        live.push(LiveProtocol {
            id,
            kind,
            state: ProtocolState::Running,
            protocol,
        });
        info!(
            "A {:?} protocol with id={} has been started. There are {} protocols running.",
            kind,
            id,
            live.len()
        );
    }

    fn set_state(&self, id: ProtocolId, expected: ProtocolState, new: ProtocolState) -> Option<SharedProtocol> {
        let Ok(mut live) = self.live.lock() else {
            return None;
        };
        let entry = live.iter_mut().find(|entry| entry.id == id)?;
        if entry.state != expected {
            warn!(
                "Ignoring {:?} -> {:?} transition for protocol {}: state is {:?}",
                expected, new, id, entry.state
            );
            return None;
        }
        entry.state = new;
        Some(Arc::clone(&entry.protocol))
    }

    fn pause_protocol(&self, id: ProtocolId) {
        if let Some(shared) = self.set_state(id, ProtocolState::Running, ProtocolState::Paused) {
            if let Ok(mut protocol) = shared.lock() {
                protocol.paused();
            }
        }
    }

    fn unpause_protocol(&self, id: ProtocolId) {
        if let Some(shared) = self.set_state(id, ProtocolState::Paused, ProtocolState::Running) {
            if let Ok(mut protocol) = shared.lock() {
                protocol.unpaused();
            }
        }
    }

    fn terminate_protocol(&self, id: ProtocolId) {
        let removed = {
            let Ok(mut live) = self.live.lock() else {
                return;
            };
            let position = live.iter().position(|entry| entry.id == id);
            let removed = position.map(|position| live.remove(position));
            if let Some(entry) = &removed {
                info!(
                    "A {:?} protocol has been terminated. There are {} protocols running.",
                    entry.kind,
                    live.len()
                );
            }
            removed
        };
        // requestTerminate on an unregistered id is a no-op
        if let Some(entry) = removed {
            if let Ok(mut protocol) = entry.protocol.lock() {
                protocol.terminated();
            }
        }
    }

    /// Stops the manager: sets the stop flag, frees every live protocol,
    /// pending delivery and queued request, then blocks until the background
    /// thread has exited. After this returns the manager is inert; no
    /// further callback fires, and requests enqueued afterwards are never
    /// drained.
    pub fn abort(&self) {
        self.stop.store(true, Ordering::SeqCst);

        {
            let Ok(_lifecycle) = self.lifecycle.lock() else {
                return;
            };
            if let Ok(mut live) = self.live.lock() {
                live.clear();
            }
            if let Ok(mut deliveries) = self.deliveries.lock() {
                deliveries.clear();
            }
            if let Ok(mut requests) = self.requests.lock() {
                requests.clear();
            }
        }

        let handle = {
            let Ok(mut background) = self.background.lock() else {
                return;
            };
            background.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Returns the lifecycle state of a protocol, or None if the id was
    /// never started or has been terminated.
    pub fn protocol_state(&self, id: ProtocolId) -> Option<ProtocolState> {
        let Ok(live) = self.live.lock() else {
            return None;
        };
        live.iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.state)
    }

    /// Number of currently running protocols.
    pub fn running_count(&self) -> usize {
        let Ok(live) = self.live.lock() else {
            return 0;
        };
        live.iter()
            .filter(|entry| entry.state == ProtocolState::Running)
            .count()
    }

    /// Number of queued deliveries, across both scheduling domains.
    pub fn pending_delivery_count(&self) -> usize {
        let Ok(deliveries) = self.deliveries.lock() else {
            return 0;
        };
        deliveries.len()
    }

    /// Number of queued lifecycle requests.
    pub fn pending_request_count(&self) -> usize {
        let Ok(requests) = self.requests.lock() else {
            return 0;
        };
        requests.len()
    }
}

impl Drop for ProtocolManager {
    fn drop(&mut self) {
        // The background thread holds an Arc to the manager, so by the time
        // drop runs the thread has already exited; the flag is set here only
        // for managers that were never aborted explicitly.
        self.stop.store(true, Ordering::SeqCst);
    }
}
