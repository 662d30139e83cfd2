// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-slot flow entry variants (§3 DATA MODEL).

use std::net::Ipv6Addr;
use std::os::fd::RawFd;

bitflags::bitflags! {
    /// Monotonic milestones reached on a TCP connection (§4.3).
    ///
    /// `SOCK_ACCEPTED`, `TAP_SYN_RCVD` and `ESTABLISHED` are the fundamental,
    /// mutually exclusive states; the rest are additive once `ESTABLISHED`
    /// is reached. `events.is_empty()` means `CLOSED`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpEvents: u16 {
        /// We accepted a listening socket on the host side.
        const SOCK_ACCEPTED     = 1 << 0;
        /// We received a SYN from the tap side.
        const TAP_SYN_RCVD      = 1 << 1;
        /// The connection is fully established on both sides.
        const ESTABLISHED       = 1 << 2;
        /// We sent SYN+ACK to the tap side.
        const TAP_SYN_ACK_SENT  = 1 << 3;
        /// The host socket reported EOF.
        const SOCK_FIN_RCVD     = 1 << 4;
        /// We sent FIN on the host socket.
        const SOCK_FIN_SENT     = 1 << 5;
        /// The tap side sent FIN.
        const TAP_FIN_RCVD      = 1 << 6;
        /// We sent FIN to the tap side.
        const TAP_FIN_SENT      = 1 << 7;
        /// Our FIN to the tap side was acknowledged.
        const TAP_FIN_ACKED     = 1 << 8;
    }
}

impl TcpEvents {
    /// The three fundamental, mutually exclusive states.
    const FUNDAMENTAL: TcpEvents = TcpEvents::SOCK_ACCEPTED
        .union(TcpEvents::TAP_SYN_RCVD)
        .union(TcpEvents::ESTABLISHED);

    /// Set one of the fundamental states, clearing the other two.
    pub fn set_fundamental(&mut self, state: TcpEvents) {
        debug_assert_eq!((state & !Self::FUNDAMENTAL).bits(), 0);
        self.remove(Self::FUNDAMENTAL);
        self.insert(state);
    }

    /// True once `events == 0`, i.e. the connection is fully closed.
    #[must_use]
    pub fn is_closed(self) -> bool {
        self.is_empty()
    }
}

bitflags::bitflags! {
    /// Transient per-connection conditions (§4.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        /// Downstream application isn't draining; forces edge-triggered
        /// polling with writability requested.
        const STALLED          = 1 << 0;
        /// The peer is known to be on the local host.
        const LOCAL             = 1 << 1;
        /// Close was initiated from the tap side.
        const ACTIVE_CLOSE      = 1 << 2;
        /// An ACK to the client is pending.
        const ACK_TO_TAP_DUE    = 1 << 3;
        /// We are waiting for an ACK from the client.
        const ACK_FROM_TAP_DUE  = 1 << 4;
    }
}

/// The TCP hash index key: far address, tap-side (near) port, far port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpKey {
    /// Far (peer) address, IPv4-mapped-in-IPv6 for unified storage.
    pub faddr: Ipv6Addr,
    /// Tap-side (near, "endpoint") port.
    pub eport: u16,
    /// Far port.
    pub fport: u16,
}

impl TcpKey {
    /// Serialize the key into bytes suitable for keyed hashing.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 20] {
        let mut buf = [0u8; 20];
        buf[..16].copy_from_slice(&self.faddr.octets());
        buf[16..18].copy_from_slice(&self.eport.to_be_bytes());
        buf[18..20].copy_from_slice(&self.fport.to_be_bytes());
        buf
    }
}

/// A TCP connection record (§3, "TCP connection record").
#[derive(Debug)]
pub struct TcpRecord {
    /// The hash index key for this connection.
    pub key: TcpKey,
    /// Host-side socket descriptor.
    pub sock: RawFd,
    /// Per-connection timer descriptor, lazily created.
    pub timer: Option<RawFd>,
    /// Reached milestones.
    pub events: TcpEvents,
    /// Transient conditions.
    pub flags: TcpFlags,
    /// Next byte we will send to the tap side.
    pub seq_to_tap: u32,
    /// Highest byte the tap side has acknowledged.
    pub seq_ack_from_tap: u32,
    /// Next byte we expect from the tap side.
    pub seq_from_tap: u32,
    /// Highest byte we have acknowledged to the tap side.
    pub seq_ack_to_tap: u32,
    /// Initial sequence number observed from the tap side.
    pub seq_init_from_tap: u32,
    /// Initial sequence number we chose for the tap side.
    pub seq_init_to_tap: u32,
    /// 8-bit hash of `seq_from_tap` at the last duplicate ACK, for
    /// fast-retransmit detection tolerant of sequence-space collisions.
    pub seq_dup_ack_approx: u8,
    /// Raw (unscaled) window advertised by the tap side.
    pub wnd_from_tap: u16,
    /// Raw (unscaled) window we advertised to the tap side.
    pub wnd_to_tap: u16,
    /// Window scale negotiated from the tap side (0 if none).
    pub ws_from_tap: u8,
    /// Window scale we advertised to the tap side (0 if none).
    pub ws_to_tap: u8,
    /// Cached effective maximum segment size.
    pub mss: u16,
    /// Retransmission count, capped at `MAX_RETRANS`.
    pub retrans: u8,
    /// Monotonic timestamp (ms) this connection's timer was last (re)armed,
    /// i.e. last progressed in a way that resets its deadline.
    pub last_activity_ts: u64,
}

/// An ICMP echo flow record (`Ping4`/`Ping6`, §3).
#[derive(Debug)]
pub struct IcmpRecord {
    /// The ping socket owned by this flow.
    pub sock: RawFd,
    /// Identifier as observed from the tap side.
    pub id: u16,
    /// Sequence number of the most recent echo.
    pub last_seq: u16,
    /// Monotonic timestamp (ms) of the last activity, for aging.
    pub last_activity_ts: u64,
}

/// One flow-table slot (§3 DATA MODEL).
///
/// `TcpSpliced` (loopback-to-loopback splice) is out of core scope and has
/// no variant here.
#[derive(Debug)]
pub enum FlowSlot {
    /// Head of a free cluster of length `n`, pointing to the next head.
    Free {
        /// Length of this free cluster, in slots.
        n: u32,
        /// Index of the next free cluster's head, or `TABLE_MAX` if this is
        /// the last cluster.
        next: u32,
    },
    /// Reserved by `alloc()` but not yet given a type by `start()`.
    ///
    /// Between `alloc()` and `start()` the allocator must not yield to the
    /// dispatcher or allocate again (§3 Lifecycles), so no other code ever
    /// observes this variant from outside `FlowTable`.
    Allocated,
    /// An L2⇄L4 TCP connection.
    Tcp(TcpRecord),
    /// An ICMPv4 echo mapping.
    Ping4(IcmpRecord),
    /// An ICMPv6 echo mapping.
    Ping6(IcmpRecord),
}

impl FlowSlot {
    /// True if this slot is part of the free list (a `Free` head or an
    /// interior slot represented implicitly by one).
    #[must_use]
    pub fn is_free_head(&self) -> bool {
        matches!(self, FlowSlot::Free { .. })
    }
}
