// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-port, per-family UDP pseudo-connection tables (§3 "UDP port
//! entries", §4.4), indexed directly by host-order port rather than a hash
//! map — every port fits in 16 bits, so a flat array is both simpler and
//! faster than a map, at the cost of one allocation per family.

use net::bitmap::Bitmap;
use std::os::fd::RawFd;
use std::time::Duration;

/// Sockets idle this long are closed on the periodic sweep.
pub const UDP_CONN_TIMEOUT: Duration = Duration::from_secs(180);

bitflags::bitflags! {
    /// Per-entry classification of the far (reverse) address (§4.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UdpFlags: u8 {
        /// Far address is known to be on the local host.
        const LOCAL    = 1 << 0;
        /// Far address is loopback.
        const LOOPBACK = 1 << 1;
        /// Far address is a global unicast IPv6 address.
        const GUA      = 1 << 2;
        /// This port forwards to the tap-facing DNS alias.
        const DNS_FWD  = 1 << 3;
    }
}

/// One tap-side source port's pseudo-connection (§3).
#[derive(Debug)]
pub struct UdpPortEntry {
    /// The nonblocking socket used for this port's datagrams.
    pub sock: RawFd,
    /// Classification flags for the far address.
    pub flags: UdpFlags,
    /// Monotonic timestamp of the last datagram seen in either direction.
    pub last_seen: Duration,
}

/// The tap-side port table for one address family: `tap_map` indexed by
/// host-order port, plus the `udp_act` aging bitmap (§4.4).
pub struct UdpTable {
    tap_map: Box<[Option<UdpPortEntry>; 65536]>,
    active: Bitmap<1024>,
}

impl UdpTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tap_map: Box::new([const { None }; 65536]),
            active: Bitmap::new(),
        }
    }

    /// Look up the pseudo-connection for `port`, if one is open.
    #[must_use]
    pub fn get(&self, port: u16) -> Option<&UdpPortEntry> {
        self.tap_map[port as usize].as_ref()
    }

    /// Mutably look up the pseudo-connection for `port`.
    pub fn get_mut(&mut self, port: u16) -> Option<&mut UdpPortEntry> {
        self.tap_map[port as usize].as_mut()
    }

    /// Open a new pseudo-connection for `port`, marking it active.
    pub fn insert(&mut self, port: u16, entry: UdpPortEntry) {
        self.tap_map[port as usize] = Some(entry);
        self.active.set(port as usize);
    }

    /// Record activity on `port` (refreshes its last-seen time, which
    /// callers update directly, and keeps it marked for the next sweep
    /// pass so it isn't reaped while still active).
    pub fn mark_active(&mut self, port: u16) {
        self.active.set(port as usize);
    }

    /// Sweep: for every port marked active since the last sweep, clear the
    /// mark. For every port *not* marked active whose entry has been idle
    /// longer than [`UDP_CONN_TIMEOUT`], remove and return it so the caller
    /// can close its socket and deregister it from the dispatcher.
    pub fn sweep(&mut self, now: Duration) -> Vec<(u16, UdpPortEntry)> {
        let mut closed = Vec::new();
        for port in 0..=u16::MAX {
            if self.tap_map[port as usize].is_none() {
                continue;
            }
            if self.active.is_set(port as usize) {
                self.active.clear(port as usize);
                continue;
            }
            let idle = now.saturating_sub(self.tap_map[port as usize].as_ref().unwrap().last_seen);
            if idle >= UDP_CONN_TIMEOUT {
                if let Some(entry) = self.tap_map[port as usize].take() {
                    closed.push((port, entry));
                }
            }
        }
        closed
    }
}

impl Default for UdpTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The pair of per-family tables (§3: "four arrays ... per IP version" —
/// `tap_map` here; `splice_init`/`splice_ns` are out of core scope, see
/// Non-goals).
#[derive(Default)]
pub struct UdpFamilyTables {
    /// IPv4 tap-side port table.
    pub v4: UdpTable,
    /// IPv6 tap-side port table.
    pub v6: UdpTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(now: Duration) -> UdpPortEntry {
        UdpPortEntry { sock: -1, flags: UdpFlags::empty(), last_seen: now }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut table = UdpTable::new();
        table.insert(5353, entry(Duration::from_secs(1)));
        assert!(table.get(5353).is_some());
    }

    #[test]
    fn sweep_leaves_active_ports_alone() {
        let mut table = UdpTable::new();
        table.insert(5353, entry(Duration::from_secs(0)));
        let closed = table.sweep(Duration::from_secs(1));
        assert!(closed.is_empty());
        assert!(table.get(5353).is_some());
    }

    #[test]
    fn sweep_reaps_idle_ports_past_timeout() {
        let mut table = UdpTable::new();
        table.insert(5353, entry(Duration::from_secs(0)));
        // First sweep consumes the activity mark set by insert().
        table.sweep(Duration::from_secs(1));
        let closed = table.sweep(Duration::from_secs(1) + UDP_CONN_TIMEOUT);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].0, 5353);
        assert!(table.get(5353).is_none());
    }

    #[test]
    fn mark_active_protects_a_port_through_one_more_sweep() {
        let mut table = UdpTable::new();
        table.insert(5353, entry(Duration::from_secs(0)));
        table.sweep(Duration::from_secs(1));
        table.mark_active(5353);
        let closed = table.sweep(Duration::from_secs(1) + UDP_CONN_TIMEOUT);
        assert!(closed.is_empty());
    }
}
