//! Lock-free per-connection counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub(crate) struct ConnectionStats {
    pub(crate) frames_sent: AtomicU64,
    pub(crate) frames_received: AtomicU64,
    pub(crate) calls_issued: AtomicU64,
    pub(crate) calls_served: AtomicU64,
    pub(crate) calls_failed: AtomicU64,
    pub(crate) yields_handled: AtomicU64,
    pub(crate) releases_sent: AtomicU64,
    pub(crate) releases_received: AtomicU64,
    pub(crate) security_violations: AtomicU64,
}

impl ConnectionStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, exported: usize, proxies: usize) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_sent: load(&self.frames_sent),
            frames_received: load(&self.frames_received),
            calls_issued: load(&self.calls_issued),
            calls_served: load(&self.calls_served),
            calls_failed: load(&self.calls_failed),
            yields_handled: load(&self.yields_handled),
            releases_sent: load(&self.releases_sent),
            releases_received: load(&self.releases_received),
            security_violations: load(&self.security_violations),
            exported_objects: exported,
            live_proxies: proxies,
        }
    }
}

/// Point-in-time view of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames written to the transport
    pub frames_sent: u64,
    /// Frames read from the transport
    pub frames_received: u64,
    /// Calls issued to the peer (yields excluded)
    pub calls_issued: u64,
    /// Inbound calls executed
    pub calls_served: u64,
    /// Inbound calls answered with an error
    pub calls_failed: u64,
    /// Yields from the peer run against a local block
    pub yields_handled: u64,
    /// Release messages sent
    pub releases_sent: u64,
    /// Release messages received
    pub releases_received: u64,
    /// Inbound calls rejected by the security checks
    pub security_violations: u64,
    /// Objects currently exported to the peer
    pub exported_objects: usize,
    /// Live proxies for the peer's objects
    pub live_proxies: usize,
}
