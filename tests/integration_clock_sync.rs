//! Two protocol managers wired back-to-back through an in-process loopback
//! transport, each running a clock sync protocol against the other.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rollnet::{
    ClockSyncProtocol, InboundEvent, ManagerConfig, PeerId, ProtocolManager, Transport,
};

/// Delivers sent payloads straight into the other side's protocol manager.
/// The remote end is bound after both managers exist.
struct Loopback {
    local: PeerId,
    remote: Mutex<Option<Arc<ProtocolManager>>>,
}

impl Loopback {
    fn new(local: PeerId) -> Arc<Self> {
        Arc::new(Self {
            local,
            remote: Mutex::new(None),
        })
    }

    fn connect(&self, manager: &Arc<ProtocolManager>) {
        *self.remote.lock().unwrap() = Some(Arc::clone(manager));
    }
}

impl Transport for Loopback {
    fn send(&self, _peer: PeerId, payload: Vec<u8>, _reliable: bool) {
        let remote = self.remote.lock().unwrap().clone();
        if let Some(manager) = remote {
            manager.propagate_event(InboundEvent::message(self.local, payload));
        }
    }
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn paired_managers() -> (Arc<ProtocolManager>, Arc<ProtocolManager>, Arc<Loopback>, Arc<Loopback>) {
    let manager_a = ProtocolManager::new(ManagerConfig::default());
    let manager_b = ProtocolManager::new(ManagerConfig::default());
    let transport_a = Loopback::new(1);
    let transport_b = Loopback::new(2);
    transport_a.connect(&manager_b);
    transport_b.connect(&manager_a);
    (manager_a, manager_b, transport_a, transport_b)
}

#[test]
fn estimates_converge_over_a_loopback_link() {
    let (manager_a, manager_b, transport_a, transport_b) = paired_managers();

    let mut sync_a = ClockSyncProtocol::new(transport_a as Arc<dyn Transport>);
    sync_a.add_peer(2);
    let clock_a = sync_a.clock();
    let mut sync_b = ClockSyncProtocol::new(transport_b as Arc<dyn Transport>);
    sync_b.add_peer(1);
    let clock_b = sync_b.clock();

    manager_a.request_start(Arc::new(Mutex::new(sync_a)));
    manager_b.request_start(Arc::new(Mutex::new(sync_b)));

    assert!(wait_until(Duration::from_secs(5), || {
        clock_a.estimate(2).is_some_and(|estimate| estimate.samples >= 3)
            && clock_b.estimate(1).is_some_and(|estimate| estimate.samples >= 3)
    }));

    let estimate = clock_a.estimate(2).unwrap();
    assert!(estimate.rtt >= 0.0 && estimate.rtt < 1.0, "rtt {}", estimate.rtt);
    // Both epochs were taken moments apart inside one process, so the
    // measured offset must be near zero
    assert!(estimate.offset.abs() < 0.5, "offset {}", estimate.offset);
    assert!(clock_a.max_rtt().is_some());

    let remote = clock_a.remote_now(2, 10.0).unwrap();
    assert!((remote - 10.0).abs() < 0.5);

    manager_a.abort();
    manager_b.abort();
}

#[test]
fn disconnect_clears_the_peer_estimate() {
    let (manager_a, manager_b, transport_a, transport_b) = paired_managers();

    let mut sync_a = ClockSyncProtocol::new(transport_a as Arc<dyn Transport>);
    sync_a.add_peer(2);
    let clock_a = sync_a.clock();
    let mut sync_b = ClockSyncProtocol::new(transport_b as Arc<dyn Transport>);
    sync_b.add_peer(1);

    manager_a.request_start(Arc::new(Mutex::new(sync_a)));
    manager_b.request_start(Arc::new(Mutex::new(sync_b)));

    assert!(wait_until(Duration::from_secs(5), || {
        clock_a.estimate(2).is_some_and(|estimate| estimate.samples >= 1)
    }));

    manager_a.propagate_event(InboundEvent::disconnected(2));
    assert!(wait_until(Duration::from_secs(2), || {
        clock_a.estimate(2).is_none()
    }));

    manager_a.abort();
    manager_b.abort();
}
