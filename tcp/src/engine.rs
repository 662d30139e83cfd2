// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The TCP engine proper (§4.3): handshake, data plane, and the bits of
//! socket setup (`SO_SNDBUF`/`SO_RCVBUF`, `TCP_INFO`) the rest of this
//! module depends on.

use crate::constants::{DEFAULT_MSS, LOW_RTT_THRESHOLD, MAX_WINDOW};
use crate::isn::initial_seq;
use crate::window::{advertised_window, LowRttLru};
use flow::{TcpEvents, TcpFlags, TcpKey, TcpRecord};
use net::siphash::SipHashSecret;
use nix::sys::socket::{
    self, AddressFamily, MsgFlags, SockFlag, SockType, SockaddrIn, SockaddrIn6, sockopt,
};
use std::io;
use std::net::Ipv6Addr;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, RawFd};
use std::time::Duration;

/// Errors raised while translating one connection's traffic.
///
/// Per §7, a handler catches these and converts them into a reset or a
/// drop; they never unwind past a flow handler.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    /// The client's SYN named an address this shim refuses to originate
    /// connections toward (unspecified, broadcast, multicast, zero port,
    /// or an unroutable link-local source).
    #[error("rejected endpoint for outbound connection")]
    InvalidEndpoint,
    /// A host-socket or client-segment operation failed at the OS level.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// `nix` reported an OS error constructing or using a socket.
    #[error("socket error: {0}")]
    Errno(#[from] nix::Error),
    /// The client's TCP header had a `doff` outside `[20, packet_len]`.
    #[error("invalid TCP data offset")]
    BadDataOffset,
}

/// One outbound segment ready to hand to the tap transport: header bytes
/// plus the payload range they describe (callers already hold the socket
/// peek buffer and just need to know which slice to send).
#[derive(Debug, Clone, Copy)]
pub struct OutSegment {
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// Offset into the caller's scratch buffer.
    pub offset: usize,
    /// Length of the payload.
    pub len: usize,
    /// Set on the final segment of a read that reached EOF.
    pub fin: bool,
}

/// Outcome of folding one already-4-tuple-grouped client packet into a
/// connection's receive state (§4.3 Client → socket, steps 1–6).
#[derive(Debug, Default)]
pub struct ClientSegmentPlan {
    /// Payload bytes to send to the host socket, in order.
    pub iov_ranges: Vec<(usize, usize)>,
    /// A FIN was observed and is positioned right after the last byte
    /// contributed above.
    pub fin: bool,
    /// The segment carried RST; the connection must close.
    pub rst: bool,
    /// A duplicate ACK at the same sequence was seen twice in a row;
    /// caller should fast-retransmit before sending any new data.
    pub fast_retransmit: bool,
}

/// The TCP engine: stateless apart from the process-wide ISN secret and the
/// low-RTT peer memory, mirroring §5's single-owner model (all mutable
/// per-connection state lives in the [`TcpRecord`] passed to each call).
pub struct TcpEngine {
    secret: SipHashSecret,
    low_rtt: LowRttLru,
}

impl TcpEngine {
    /// Build an engine with a freshly generated ISN secret.
    #[must_use]
    pub fn new(secret: SipHashSecret) -> Self {
        Self { secret, low_rtt: LowRttLru::new() }
    }

    /// Open a nonblocking TCP socket in `family`, per §5 (the socket pool
    /// normally supplies this; this is the fallback / refill path).
    ///
    /// # Errors
    ///
    /// Returns [`TcpError::Errno`] if `socket(2)` fails.
    pub fn open_nonblocking_socket(&self, family: AddressFamily) -> Result<RawFd, TcpError> {
        let fd = socket::socket(family, SockType::Stream, SockFlag::SOCK_NONBLOCK, None)?;
        Ok(fd.into_raw_fd())
    }

    /// Attempt to grow `SO_SNDBUF`/`SO_RCVBUF` to the kernel maximum so
    /// [`crate::window::sndbuf_effective`] has room to scale (supplement
    /// from `original_source/tcp.c:921-935`, `tcp_sock_set_bufsize`).
    /// Failures are logged and ignored: this is a best-effort tuning step,
    /// never load-bearing for correctness.
    pub fn set_max_bufsize(&self, fd: RawFd) {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        for (name, label) in [(0, "SO_SNDBUF"), (1, "SO_RCVBUF")] {
            let result = if name == 0 {
                socket::setsockopt(&borrowed, sockopt::SndBuf, &(SNDBUF_MAX as usize))
            } else {
                socket::setsockopt(&borrowed, sockopt::RcvBuf, &(SNDBUF_MAX as usize))
            };
            if let Err(e) = result {
                tracing::debug!(%label, error = %e, "failed to raise socket buffer size");
            }
        }
    }

    /// Accept a new inbound (host → client) connection: the caller has
    /// already `accept()`ed a listening socket and allocated a flow; this
    /// fills in the fresh [`TcpRecord`]'s handshake state.
    pub fn accept_inbound(
        &self,
        key: TcpKey,
        laddr: Ipv6Addr,
        sock: RawFd,
        now: Duration,
    ) -> TcpRecord {
        let seq_init_to_tap = initial_seq(&self.secret, key.faddr, laddr, key.fport, key.eport, now);
        let mut record = TcpRecord {
            key,
            sock,
            timer: None,
            events: TcpEvents::empty(),
            flags: TcpFlags::ACK_FROM_TAP_DUE,
            seq_to_tap: seq_init_to_tap,
            seq_ack_from_tap: seq_init_to_tap,
            seq_from_tap: 0,
            seq_ack_to_tap: 0,
            seq_init_from_tap: 0,
            seq_init_to_tap,
            seq_dup_ack_approx: 0,
            wnd_from_tap: 0,
            wnd_to_tap: 0,
            ws_from_tap: 0,
            ws_to_tap: 0,
            mss: DEFAULT_MSS,
            retrans: 0,
            last_activity_ts: now.as_millis() as u64,
        };
        record.events.set_fundamental(TcpEvents::SOCK_ACCEPTED);
        record
    }

    /// Reset the connection's timer deadline to `now` (§4.3 Timer
    /// semantics: any state transition that changes `next_deadline`
    /// rearms it).
    pub fn touch(&self, record: &mut TcpRecord, now: Duration) {
        record.last_activity_ts = now.as_millis() as u64;
    }

    /// The client's SYN+ACK arrived: record its MSS/window-scale, move to
    /// `ESTABLISHED`. Caller still owes draining any already-queued host
    /// data (`socket_to_client`) and sending an ACK.
    pub fn on_client_syn_ack(
        &self,
        record: &mut TcpRecord,
        client_isn: u32,
        client_mss: Option<u16>,
        client_ws: Option<u8>,
        client_wnd: u16,
    ) {
        record.seq_init_from_tap = client_isn;
        record.seq_from_tap = client_isn.wrapping_add(1);
        record.seq_ack_to_tap = record.seq_from_tap;
        record.mss = client_mss.unwrap_or(DEFAULT_MSS);
        record.ws_from_tap = client_ws.unwrap_or(0);
        record.wnd_from_tap = client_wnd;
        record.events.set_fundamental(TcpEvents::ESTABLISHED);
        record.flags.remove(TcpFlags::ACK_FROM_TAP_DUE);
    }

    /// Validate a client SYN's endpoints (§4.3 Outbound, "validate
    /// endpoints"): reject unspecified, broadcast, or multicast
    /// destinations and zero ports outright.
    ///
    /// # Errors
    ///
    /// Returns [`TcpError::InvalidEndpoint`] if any check fails.
    pub fn validate_outbound_endpoint(faddr: Ipv6Addr, fport: u16, eport: u16) -> Result<(), TcpError> {
        if fport == 0 || eport == 0 {
            return Err(TcpError::InvalidEndpoint);
        }
        if faddr.is_unspecified() || faddr.is_multicast() {
            return Err(TcpError::InvalidEndpoint);
        }
        if let Some(v4) = faddr.to_ipv4_mapped() {
            if v4.is_broadcast() {
                return Err(TcpError::InvalidEndpoint);
            }
        }
        Ok(())
    }

    /// Begin an outbound (client → host) connection: open a nonblocking
    /// socket in the right family and call `connect()`. Returns whether the
    /// connection completed synchronously (loopback/local fast path) or is
    /// pending `EINPROGRESS`.
    ///
    /// # Errors
    ///
    /// Returns [`TcpError::Errno`] for any `connect(2)` failure other than
    /// `EINPROGRESS`.
    pub fn connect_outbound(
        &self,
        sock: RawFd,
        faddr: Ipv6Addr,
        fport: u16,
    ) -> Result<bool, TcpError> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(sock) };
        let result = if let Some(v4) = faddr.to_ipv4_mapped() {
            let addr = SockaddrIn::from(std::net::SocketAddrV4::new(v4, fport));
            socket::connect(borrowed.as_raw_fd(), &addr)
        } else {
            let addr = SockaddrIn6::from(std::net::SocketAddrV6::new(faddr, fport, 0, 0));
            socket::connect(borrowed.as_raw_fd(), &addr)
        };
        match result {
            Ok(()) => Ok(true),
            Err(nix::Error::EINPROGRESS) => Ok(false),
            Err(e) => Err(TcpError::Errno(e)),
        }
    }

    /// Connect completed (either synchronously or after `EPOLLOUT`): set up
    /// the handshake state the tap side needs to see a SYN+ACK.
    pub fn on_connect_complete(&self, record: &mut TcpRecord, laddr: Ipv6Addr, now: Duration) {
        let seq_init_to_tap = initial_seq(
            &self.secret,
            record.key.faddr,
            laddr,
            record.key.fport,
            record.key.eport,
            now,
        );
        record.seq_init_to_tap = seq_init_to_tap;
        record.seq_to_tap = seq_init_to_tap;
        record.seq_ack_from_tap = seq_init_to_tap;
        record.flags.insert(TcpFlags::ACK_FROM_TAP_DUE);
    }

    /// The client's final ACK of the three-way handshake arrived.
    pub fn on_handshake_ack(&self, record: &mut TcpRecord) {
        record.events.set_fundamental(TcpEvents::ESTABLISHED);
        record.flags.remove(TcpFlags::ACK_FROM_TAP_DUE);
    }

    /// Compute the window to advertise to the tap side right now (§4.3
    /// Window tracking, Low-RTT optimization).
    #[must_use]
    pub fn window_to_advertise(
        &self,
        faddr: Ipv6Addr,
        tcpi_snd_wnd: Option<u32>,
        tcpi_min_rtt: Option<Duration>,
        sndbuf: u32,
    ) -> u32 {
        if let Some(rtt) = tcpi_min_rtt {
            if rtt <= LOW_RTT_THRESHOLD && self.low_rtt.contains(faddr) {
                return tcpi_snd_wnd.unwrap_or(sndbuf).min(MAX_WINDOW);
            }
        }
        advertised_window(tcpi_snd_wnd, sndbuf)
    }

    /// Remember `faddr` as low-RTT after a qualifying `TCP_INFO` sample.
    pub fn note_low_rtt(&mut self, faddr: Ipv6Addr, tcpi_min_rtt: Duration) {
        if tcpi_min_rtt <= LOW_RTT_THRESHOLD {
            self.low_rtt.touch(faddr);
        }
    }

    /// Sample `TCP_INFO` and `SO_SNDBUF` on `sock`, feeding
    /// [`TcpEngine::window_to_advertise`] (§4.3 Window tracking) and, when
    /// the sample qualifies, [`TcpEngine::note_low_rtt`] (supplement from
    /// `original_source/tcp.c:1598-1617`, the `tcp_update_seqs`/
    /// `tcp_rtt_dst_check` `TCP_INFO` probe). Best-effort like
    /// [`TcpEngine::set_max_bufsize`]: a failed read falls back to
    /// `(None, None, SNDBUF_MAX)`.
    pub fn sample_socket_state(&mut self, faddr: Ipv6Addr, sock: RawFd) -> (Option<u32>, Option<Duration>, u32) {
        let borrowed = unsafe { BorrowedFd::borrow_raw(sock) };
        let sndbuf = socket::getsockopt(&borrowed, sockopt::SndBuf).unwrap_or(SNDBUF_MAX as usize) as u32;

        let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;
        let ok = unsafe {
            libc::getsockopt(
                sock,
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                std::ptr::from_mut(&mut info).cast(),
                &mut len,
            )
        } == 0;
        if !ok {
            return (None, None, sndbuf);
        }
        let tcpi_snd_wnd = (info.tcpi_snd_wnd > 0).then_some(info.tcpi_snd_wnd);
        let tcpi_min_rtt = (info.tcpi_min_rtt > 0).then(|| Duration::from_micros(u64::from(info.tcpi_min_rtt)));
        if let Some(rtt) = tcpi_min_rtt {
            self.note_low_rtt(faddr, rtt);
        }
        (tcpi_snd_wnd, tcpi_min_rtt, sndbuf)
    }

    /// Process a tap-side ACK: dequeue the newly-acknowledged bytes from
    /// the host socket (so the kernel can free the send buffer) and detect
    /// a duplicate-ACK fast-retransmit trigger via the 8-bit sequence hash.
    ///
    /// # Errors
    ///
    /// Returns [`TcpError::Io`] if the socket `recv(MSG_TRUNC)` fails for a
    /// reason other than the ACK being stale (already consumed).
    pub fn consume_ack(&self, record: &mut TcpRecord, ack_seq: u32) -> Result<bool, TcpError> {
        let delta = ack_seq.wrapping_sub(record.seq_ack_from_tap);
        if delta == 0 || delta > MAX_WINDOW {
            // Old or bogus ACK (wrapped-negative delta looks huge); ignore.
            let hash = dup_ack_hash(record.seq_from_tap);
            let is_dup = record.seq_dup_ack_approx == hash;
            record.seq_dup_ack_approx = hash;
            return Ok(is_dup && delta == 0);
        }
        let borrowed = unsafe { BorrowedFd::borrow_raw(record.sock) };
        let mut scratch = vec![0u8; delta as usize];
        match socket::recv(borrowed.as_raw_fd(), &mut scratch, MsgFlags::MSG_TRUNC) {
            Ok(_) | Err(nix::Error::EAGAIN) => {}
            Err(e) => return Err(TcpError::Errno(e)),
        }
        record.seq_ack_from_tap = ack_seq;
        Ok(false)
    }

    /// Build the outbound segment plan for a peek (`MSG_PEEK`) of
    /// `available` bytes from the socket (§4.3 Socket → client), counted
    /// from `seq_ack_from_tap` — the already-sent-but-unacked prefix is
    /// still sitting in the kernel receive buffer (`consume_ack` hasn't
    /// dequeued it yet) and is skipped rather than resent. Segments are
    /// bounded by `mss` and by the scaled client window.
    #[must_use]
    pub fn plan_socket_to_client(
        &self,
        record: &TcpRecord,
        available: usize,
        client_window: u32,
        read_hit_eof: bool,
    ) -> Vec<OutSegment> {
        let in_flight = record.seq_to_tap.wrapping_sub(record.seq_ack_from_tap) as usize;
        let new_bytes = available.saturating_sub(in_flight);
        let window_left = client_window.saturating_sub(in_flight as u32) as usize;
        let to_send = new_bytes.min(window_left);
        let mss = record.mss.max(1) as usize;

        let mut segments = Vec::with_capacity(to_send.div_ceil(mss).max(1));
        let mut offset = in_flight;
        let mut seq = record.seq_to_tap;
        let end = in_flight + to_send;
        while offset < end {
            let len = mss.min(end - offset);
            segments.push(OutSegment { seq, offset, len, fin: false });
            offset += len;
            seq = seq.wrapping_add(len as u32);
        }
        if read_hit_eof && end == available {
            if let Some(last) = segments.last_mut() {
                last.fin = true;
            } else {
                segments.push(OutSegment { seq, offset, len: 0, fin: true });
            }
        }
        segments
    }

    /// Fold one already-4-tuple-grouped client packet into the connection's
    /// receive state (§4.3 Client → socket, steps 1–6).
    ///
    /// # Errors
    ///
    /// Returns [`TcpError::BadDataOffset`] if `doff` is out of range.
    #[allow(clippy::too_many_arguments)]
    pub fn fold_client_segment(
        &self,
        record: &mut TcpRecord,
        seg_seq: u32,
        data_len: usize,
        doff_bytes: usize,
        packet_len: usize,
        rst: bool,
        ack: bool,
        ack_seq: u32,
        fin: bool,
        plan: &mut ClientSegmentPlan,
    ) -> Result<(), TcpError> {
        if doff_bytes < 20 || doff_bytes > packet_len {
            return Err(TcpError::BadDataOffset);
        }
        if rst {
            plan.rst = true;
            return Ok(());
        }
        if ack {
            let is_dup = self.consume_ack(record, ack_seq)?;
            if is_dup && data_len == 0 && !fin {
                plan.fast_retransmit = true;
            }
        }

        let offset = (record.seq_from_tap.wrapping_sub(seg_seq)) as i64;
        if offset >= 0 && (seg_seq as u64 + data_len as u64) > record.seq_from_tap as u64 {
            let start = offset as usize;
            plan.iov_ranges.push((start, data_len - start));
            record.seq_from_tap = record.seq_from_tap.wrapping_add((data_len - start) as u32);
        } else if offset >= 0 {
            // Pure duplicate; nothing to contribute.
        } else {
            // Future segment: the gap-closing / `keep` resume logic lives in
            // the caller, which holds the whole 4-tuple's packet pool and
            // can re-scan once an earlier gap-closing segment arrives.
        }

        if fin {
            plan.fin = true;
        }
        Ok(())
    }
}

/// 8-bit hash of a sequence number for duplicate-ACK detection (§4.3 Socket
/// → client): tolerates sequence-space collisions with acceptable risk,
/// trading a rare spurious fast-retransmit for O(1) state.
fn dup_ack_hash(seq: u32) -> u8 {
    (seq ^ (seq >> 8) ^ (seq >> 16) ^ (seq >> 24)) as u8
}

/// Kernel maximum attempted for `SO_SNDBUF`/`SO_RCVBUF` (`tcp_sock_set_bufsize`).
const SNDBUF_MAX: u32 = 4 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn secret() -> SipHashSecret {
        SipHashSecret::from_parts(1, 2)
    }

    fn key() -> TcpKey {
        TcpKey { faddr: Ipv6Addr::LOCALHOST, eport: 1000, fport: 80 }
    }

    #[test]
    fn accept_inbound_sets_sock_accepted_and_schedules_ack_wait() {
        let engine = TcpEngine::new(secret());
        let record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        assert!(record.events.contains(TcpEvents::SOCK_ACCEPTED));
        assert!(record.flags.contains(TcpFlags::ACK_FROM_TAP_DUE));
    }

    #[test]
    fn client_syn_ack_moves_to_established() {
        let engine = TcpEngine::new(secret());
        let mut record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        engine.on_client_syn_ack(&mut record, 5000, Some(1400), Some(7), 65535);
        assert!(record.events.contains(TcpEvents::ESTABLISHED));
        assert!(!record.flags.contains(TcpFlags::ACK_FROM_TAP_DUE));
        assert_eq!(record.seq_from_tap, 5001);
    }

    #[test]
    fn validate_outbound_endpoint_rejects_zero_port() {
        assert!(matches!(
            TcpEngine::validate_outbound_endpoint(Ipv6Addr::LOCALHOST, 0, 1000),
            Err(TcpError::InvalidEndpoint)
        ));
    }

    #[test]
    fn validate_outbound_endpoint_rejects_unspecified() {
        assert!(matches!(
            TcpEngine::validate_outbound_endpoint(Ipv6Addr::UNSPECIFIED, 80, 1000),
            Err(TcpError::InvalidEndpoint)
        ));
    }

    #[test]
    fn validate_outbound_endpoint_accepts_ordinary_address() {
        assert!(TcpEngine::validate_outbound_endpoint(Ipv6Addr::LOCALHOST, 80, 1000).is_ok());
    }

    #[test]
    fn plan_socket_to_client_splits_into_mss_segments() {
        let engine = TcpEngine::new(secret());
        let mut record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        record.mss = 100;
        let segments = engine.plan_socket_to_client(&record, 250, 1_000_000, false);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len, 100);
        assert_eq!(segments[2].len, 50);
        assert!(segments.iter().all(|s| !s.fin));
    }

    #[test]
    fn plan_socket_to_client_marks_fin_on_eof() {
        let engine = TcpEngine::new(secret());
        let record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        let segments = engine.plan_socket_to_client(&record, 0, 1_000_000, true);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].fin);
        assert_eq!(segments[0].len, 0);
    }

    #[test]
    fn plan_socket_to_client_respects_client_window() {
        let engine = TcpEngine::new(secret());
        let record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        let segments = engine.plan_socket_to_client(&record, 5000, 500, false);
        let total: usize = segments.iter().map(|s| s.len).sum();
        assert_eq!(total, 500);
    }

    #[test]
    fn fold_client_segment_rejects_bad_data_offset() {
        let engine = TcpEngine::new(secret());
        let mut record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        let mut plan = ClientSegmentPlan::default();
        let result = engine.fold_client_segment(&mut record, 0, 10, 10, 20, false, false, 0, false, &mut plan);
        assert!(matches!(result, Err(TcpError::BadDataOffset)));
    }

    #[test]
    fn fold_client_segment_contributes_in_order_data() {
        let engine = TcpEngine::new(secret());
        let mut record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        record.seq_from_tap = 100;
        let mut plan = ClientSegmentPlan::default();
        engine
            .fold_client_segment(&mut record, 100, 50, 20, 70, false, false, 0, false, &mut plan)
            .unwrap();
        assert_eq!(plan.iov_ranges, vec![(0, 50)]);
        assert_eq!(record.seq_from_tap, 150);
    }

    #[test]
    fn fold_client_segment_skips_pure_duplicate() {
        let engine = TcpEngine::new(secret());
        let mut record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        record.seq_from_tap = 100;
        let mut plan = ClientSegmentPlan::default();
        engine
            .fold_client_segment(&mut record, 50, 50, 20, 70, false, false, 0, false, &mut plan)
            .unwrap();
        assert!(plan.iov_ranges.is_empty());
        assert_eq!(record.seq_from_tap, 100);
    }

    #[test]
    fn fold_client_segment_detects_rst() {
        let engine = TcpEngine::new(secret());
        let mut record = engine.accept_inbound(key(), Ipv6Addr::LOCALHOST, -1, Duration::from_secs(1));
        let mut plan = ClientSegmentPlan::default();
        engine
            .fold_client_segment(&mut record, 0, 0, 20, 20, true, false, 0, false, &mut plan)
            .unwrap();
        assert!(plan.rst);
    }
}
