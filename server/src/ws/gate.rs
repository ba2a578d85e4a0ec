//! Per-IP cap on concurrent WebSocket sessions, checked before the handshake.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;

pub struct ConnectionGate {
    max_per_ip: usize,
    active: DashMap<IpAddr, usize>,
}

impl ConnectionGate {
    /// `max_per_ip == 0` admits everything.
    pub fn new(max_per_ip: usize) -> Arc<Self> {
        Arc::new(Self {
            max_per_ip,
            active: DashMap::new(),
        })
    }

    /// Reserve a slot for `ip`, held until the returned permit is dropped.
    pub fn try_acquire(self: &Arc<Self>, ip: IpAddr) -> Option<GatePermit> {
        let mut count = self.active.entry(ip).or_insert(0);
        if self.max_per_ip > 0 && *count >= self.max_per_ip {
            return None;
        }
        *count += 1;
        drop(count);

        Some(GatePermit {
            gate: Arc::clone(self),
            ip,
        })
    }

    pub fn active(&self, ip: IpAddr) -> usize {
        self.active.get(&ip).map(|c| *c).unwrap_or(0)
    }

    fn release(&self, ip: IpAddr) {
        if let Some(mut count) = self.active.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.active.remove_if(&ip, |_, count| *count == 0);
    }
}

/// One admitted connection's slot.
pub struct GatePermit {
    gate: Arc<ConnectionGate>,
    ip: IpAddr,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release(self.ip);
    }
}
