// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The shim's core: one [`Shim`] per running process, owning every
//! per-connection table and driving the single event loop that moves
//! frames between the tap transport and host kernel sockets (§5 DISPATCH).

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use mio::Interest;
use nix::sys::socket::{
    self, AddressFamily, MsgFlags, SockFlag, SockProtocol, SockType, SockaddrIn, SockaddrIn6,
    SockaddrStorage, sockopt,
};

use config::{Config, PortForward};
use dispatch::token::{Ref, RefType};
use dispatch::{DispatchError, Dispatcher};
use flow::{FlowIndex, FlowSlot, FlowTable, TcpEvents, TcpFlags, TcpHashIndex, TcpKey, TcpRecord};
use icmp::IcmpEngine;
use net::eth::{Eth, Mac};
use net::icmp::{Icmp4, Icmp6};
use net::ipv4::{self, Ipv4};
use net::ipv6::Ipv6;
use net::parse::Parse;
use net::siphash::SipHashSecret;
use net::tcp::Tcp;
use tap::{Classification, Demux, FamilyPool, TAP_BUF_BYTES, Transport};
use tcp::{TcpEngine, TimerAction};
use udp::{DnsGateway, UdpFamilyTables, UdpFlags, UdpPortEntry};

use crate::framing;

/// Flow-table capacity.
pub const TABLE_MAX: u32 = 8192;
/// TCP hash index size, sized for a 70% maximum load factor at `TABLE_MAX`
/// occupancy.
pub const HASH_MAX: usize = (TABLE_MAX as usize) * 100 / 70;

/// Placeholder source MAC this shim presents on every frame it writes to
/// the tap side. Neither `CmdArgs` nor `Config` carries a configured
/// address for our own side (that's left to the external tap-setup
/// wrapper in the teacher's namespace-join flow, out of scope here); see
/// DESIGN.md.
const OUR_MAC: Mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

/// `/dev/net/tun` interface name for the raw-TUN transport. Fixed for the
/// same reason as [`OUR_MAC`]: no CLI/config field carries one.
pub const TAP_IFNAME: &str = "netshim0";

/// Default guest-facing address, used whenever `Config::address` wasn't
/// given.
const DEFAULT_GUEST_V4: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 15);
/// Default gateway address, used whenever `Config::gateway` wasn't given.
const DEFAULT_GATEWAY_V4: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 2);
/// Link-local stand-in address for the IPv6 "gateway" role (§4.4).
const DEFAULT_LINK_LOCAL_V6: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);

/// Number of events `mio` hands back per [`Dispatcher::poll`] call.
const EVENT_CAPACITY: usize = 512;

/// Tracks the far peer most recently associated with one tap-side UDP
/// port, since [`UdpPortEntry`] itself carries no address — only the
/// socket, flags and last-seen timestamp (§3).
#[derive(Debug, Clone, Copy, Default)]
struct UdpPeer {
    tap_addr: Option<Ipv6Addr>,
    last_host_addr: Option<Ipv6Addr>,
}

/// The shim's core state (§3 DATA MODEL, minus the parts this workspace
/// scopes out: `TcpSpliced`, DHCP/NDP/ARP mini-servers, namespace entry).
pub struct Shim {
    config: Config,
    dispatcher: Dispatcher,
    transport: Transport,
    demux: Demux,
    rx_buf: Vec<u8>,

    flow_table: FlowTable,
    hash_index: TcpHashIndex,
    tcp_engine: TcpEngine,
    udp_tables: UdpFamilyTables,
    icmp_by_id_v4: Box<[Option<FlowIndex>; 65536]>,
    icmp_by_id_v6: Box<[Option<FlowIndex>; 65536]>,

    udp_peers_v4: HashMap<u16, UdpPeer>,
    udp_peers_v6: HashMap<u16, UdpPeer>,

    dns: DnsGateway,
    guest_v4: Ipv4Addr,
    gateway_v4: Ipv4Addr,

    tcp_listeners: Vec<RawFd>,
    udp_listeners: Vec<RawFd>,

    /// Sockets whose nonblocking `connect()` hasn't resolved yet, distinct
    /// from the handshake-phase bookkeeping `TcpFlags::ACK_FROM_TAP_DUE`
    /// already covers (that flag stays set through the whole pre-established
    /// phase, not just the raw-socket-connect sliver of it).
    connecting: HashSet<RawFd>,

    /// Pre-opened, unconnected outbound TCP sockets, one pool per address
    /// family, refilled to `tcp::TCP_SOCK_POOL_SIZE` on each periodic tick
    /// (§5 Shared resources).
    tcp_pool_v4: Vec<RawFd>,
    tcp_pool_v6: Vec<RawFd>,
}

impl Shim {
    /// Build a shim from a frozen [`Config`] and an already-opened tap
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the OS event demultiplexer can't be
    /// created, or registering the tap transport or a forwarded listener
    /// fails.
    pub fn new(config: Config, transport: Transport) -> Result<Self, DispatchError> {
        let (k0, k1) = (u64::from_ne_bytes(random_bytes()), u64::from_ne_bytes(random_bytes()));

        let guest_v4 = match config.address {
            Some(IpAddr::V4(a)) => a,
            _ => DEFAULT_GUEST_V4,
        };
        let gateway_v4 = match config.gateway {
            Some(IpAddr::V4(a)) => a,
            _ => DEFAULT_GATEWAY_V4,
        };
        let host_dns = match config.dns_forward.or_else(|| config.dns.first().copied()) {
            Some(IpAddr::V4(a)) => a.to_ipv6_mapped(),
            Some(IpAddr::V6(a)) => a,
            None => Ipv6Addr::LOCALHOST,
        };
        let dns = DnsGateway {
            host_dns,
            tap_dns_alias: gateway_v4.to_ipv6_mapped(),
            gateway: gateway_v4.to_ipv6_mapped(),
            link_local: DEFAULT_LINK_LOCAL_V6,
        };

        let dispatcher = Dispatcher::new(EVENT_CAPACITY)?;
        dispatcher.register(
            transport.as_raw_fd(),
            Interest::READABLE,
            Ref::new(RefType::TapPasta, transport.as_raw_fd(), 0),
        )?;

        let mut shim = Self {
            config,
            dispatcher,
            transport,
            demux: Demux::new(),
            rx_buf: vec![0u8; TAP_BUF_BYTES],
            flow_table: FlowTable::new(TABLE_MAX),
            hash_index: TcpHashIndex::new(HASH_MAX, SipHashSecret::from_parts(k0, k1)),
            tcp_engine: TcpEngine::new(SipHashSecret::from_parts(k0, k1)),
            udp_tables: UdpFamilyTables::default(),
            icmp_by_id_v4: Box::new([None; 65536]),
            icmp_by_id_v6: Box::new([None; 65536]),
            udp_peers_v4: HashMap::new(),
            udp_peers_v6: HashMap::new(),
            dns,
            guest_v4,
            gateway_v4,
            tcp_listeners: Vec::new(),
            udp_listeners: Vec::new(),
            connecting: HashSet::new(),
            tcp_pool_v4: Vec::new(),
            tcp_pool_v6: Vec::new(),
        };

        shim.setup_forward_listeners()?;
        shim.refill_tcp_pool(AddressFamily::Inet);
        shim.refill_tcp_pool(AddressFamily::Inet6);
        Ok(shim)
    }

    /// Top up the per-family outbound TCP socket pool to
    /// `tcp::TCP_SOCK_POOL_SIZE`, so `start_outbound_tcp` usually just pops
    /// an already-open socket instead of paying `socket()` latency inline.
    fn refill_tcp_pool(&mut self, family: AddressFamily) {
        loop {
            let len = if family == AddressFamily::Inet { self.tcp_pool_v4.len() } else { self.tcp_pool_v6.len() };
            if len >= tcp::TCP_SOCK_POOL_SIZE {
                break;
            }
            let Ok(fd) = self.tcp_engine.open_nonblocking_socket(family) else { break };
            self.tcp_engine.set_max_bufsize(fd);
            if family == AddressFamily::Inet {
                self.tcp_pool_v4.push(fd);
            } else {
                self.tcp_pool_v6.push(fd);
            }
        }
    }

    fn setup_forward_listeners(&mut self) -> Result<(), DispatchError> {
        if let PortForward::Items(items) = &self.config.tcp_forward {
            for item in items.iter().filter(|i| !i.exclude) {
                for port in item.first..=item.last {
                    match open_tcp_listener(port) {
                        Ok(fd) => {
                            self.dispatcher.register(
                                fd,
                                Interest::READABLE,
                                Ref::new(RefType::TcpListen, fd, u32::from(port)),
                            )?;
                            self.tcp_listeners.push(fd);
                        }
                        Err(e) => tracing::warn!(port, error = %e, "failed to open forwarded TCP listener"),
                    }
                }
            }
        }
        if let PortForward::Items(items) = &self.config.udp_forward {
            for item in items.iter().filter(|i| !i.exclude) {
                for port in item.first..=item.last {
                    match open_udp_listener(port) {
                        Ok(fd) => {
                            self.dispatcher.register(
                                fd,
                                Interest::READABLE,
                                Ref::new(RefType::Udp, fd, u32::from(port) | UDP_FORWARD_TAG),
                            )?;
                            self.udp_listeners.push(fd);
                            self.udp_tables.v4.insert(
                                port,
                                UdpPortEntry { sock: fd, flags: UdpFlags::empty(), last_seen: Duration::ZERO },
                            );
                        }
                        Err(e) => tracing::warn!(port, error = %e, "failed to open forwarded UDP listener"),
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the event loop until `shutdown` is observed set (§5 step 0).
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the underlying poll call fails.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), DispatchError> {
        while !crate::shutdown::requested(shutdown) {
            let now = monotonic_now();
            let refs = self.dispatcher.poll()?;
            for reference in refs {
                self.handle_ready(reference, now);
            }
            self.tick(now);
        }
        Ok(())
    }

    fn handle_ready(&mut self, reference: Ref, now: Duration) {
        match reference.kind {
            RefType::TapPasta | RefType::TapPasst => self.drain_tap(now),
            RefType::Tcp => self.handle_tcp_socket(FlowIndex::new(reference.payload), now),
            RefType::TcpListen => self.accept_forwarded_tcp(reference.fd as RawFd, now),
            RefType::Udp => self.handle_udp_socket(reference, now),
            RefType::Ping => self.handle_ping_socket(reference, now),
            _ => {}
        }
    }

    // ---------------------------------------------------------------
    // Tap ingestion (§4.5)
    // ---------------------------------------------------------------

    fn drain_tap(&mut self, now: Duration) {
        let mut cursor = 0usize;
        let mut pool = FamilyPool::default();
        loop {
            if cursor >= self.rx_buf.len() {
                break;
            }
            let n = match self.transport.read_frame(&mut self.rx_buf[cursor..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "tap read failed");
                    break;
                }
            };
            let slot = tap::FrameSlot { offset: cursor, len: n };
            match self.demux.classify(&self.rx_buf[cursor..cursor + n]) {
                Classification::Ipv4 => pool.v4.push(slot),
                Classification::Ipv6 => pool.v6.push(slot),
                Classification::Arp | Classification::Unhandled => {}
            }
            cursor += n;
        }

        self.handle_icmp_frames(&pool, now);

        let v4_batches = self.demux.group_v4(&pool.v4, &self.rx_buf, Eth::HEADER_LEN, now);
        for batch in v4_batches {
            self.handle_tcp_or_udp_v4(batch, now);
        }
        let v6_batches = self.demux.group_v6(&pool.v6, &self.rx_buf, Eth::HEADER_LEN);
        for batch in v6_batches {
            self.handle_tcp_or_udp_v6(batch, now);
        }
    }

    fn handle_icmp_frames(&mut self, pool: &FamilyPool, now: Duration) {
        for slot in &pool.v4 {
            let frame = &self.rx_buf[slot.offset..slot.offset + slot.len];
            let Ok((ip, consumed)) = Ipv4::parse(&frame[Eth::HEADER_LEN..]) else { continue };
            if ip.protocol() != ipv4::proto::ICMP || ip.is_fragment() {
                continue;
            }
            let l4 = &frame[Eth::HEADER_LEN + consumed.get()..];
            let Ok((icmp, icmp_len)) = Icmp4::parse(l4) else { continue };
            if !icmp.is_echo_request() {
                continue;
            }
            let Some((id, seq)) = icmp.echo_id_seq() else { continue };
            let data = l4[icmp_len.get()..].to_vec();
            self.handle_icmp_echo_v4(id, seq, ip.source(), ip.destination(), &data, now);
        }
        for slot in &pool.v6 {
            let frame = &self.rx_buf[slot.offset..slot.offset + slot.len];
            let Ok((ip, consumed)) = Ipv6::parse(&frame[Eth::HEADER_LEN..]) else { continue };
            if ip.next_header() != 58 {
                continue;
            }
            let l4 = &frame[Eth::HEADER_LEN + consumed.get()..];
            let Ok((icmp, icmp_len)) = Icmp6::parse(l4) else { continue };
            if !icmp.is_echo_request() {
                continue;
            }
            let Some((id, seq)) = icmp.echo_id_seq() else { continue };
            let data = l4[icmp_len.get()..].to_vec();
            self.handle_icmp_echo_v6(id, seq, ip.source(), ip.destination(), &data, now);
        }
    }

    fn handle_icmp_echo_v4(&mut self, id: u16, seq: u16, src: Ipv4Addr, dst: Ipv4Addr, data: &[u8], now: Duration) {
        if !self.config.engines.icmp {
            return;
        }
        let index = match self.icmp_by_id_v4[id as usize] {
            Some(idx) => {
                if let FlowSlot::Ping4(record) = self.flow_table.get_mut(idx) {
                    IcmpEngine::touch(record, seq, now);
                }
                idx
            }
            None => {
                let Ok(sock) = open_ping_socket(AddressFamily::Inet) else {
                    tracing::debug!("failed to open ICMPv4 ping socket");
                    return;
                };
                let Ok(index) = self.flow_table.alloc() else {
                    tracing::warn!("flow table full, dropping ICMP echo");
                    let _ = nix::unistd::close(sock);
                    return;
                };
                self.flow_table.start(index, FlowSlot::Ping4(IcmpEngine::new_flow(sock, id, seq, now)));
                self.icmp_by_id_v4[id as usize] = Some(index);
                let _ = self.dispatcher.register(sock, Interest::READABLE, Ref::new(RefType::Ping, sock, id.into()));
                index
            }
        };
        let FlowSlot::Ping4(record) = self.flow_table.get(index) else { return };
        let mut request = Icmp4::echo_request(id, seq);
        framing::icmp4_checksum(&mut request, data);
        let mut packet = vec![0u8; request.size().get() + data.len()];
        let _ = net::parse::DeParse::deparse(&request, &mut packet[..request.size().get()]);
        packet[request.size().get()..].copy_from_slice(data);
        let dest = SockaddrIn::from(std::net::SocketAddrV4::new(dst, 0));
        let _ = socket::sendto(record.sock, &packet, &dest, MsgFlags::MSG_DONTWAIT);
        let _ = src;
    }

    fn handle_icmp_echo_v6(&mut self, id: u16, seq: u16, src: Ipv6Addr, dst: Ipv6Addr, data: &[u8], now: Duration) {
        if !self.config.engines.icmp {
            return;
        }
        let index = match self.icmp_by_id_v6[id as usize] {
            Some(idx) => {
                if let FlowSlot::Ping6(record) = self.flow_table.get_mut(idx) {
                    IcmpEngine::touch(record, seq, now);
                }
                idx
            }
            None => {
                let Ok(sock) = open_ping_socket(AddressFamily::Inet6) else {
                    tracing::debug!("failed to open ICMPv6 ping socket");
                    return;
                };
                let Ok(index) = self.flow_table.alloc() else {
                    tracing::warn!("flow table full, dropping ICMP echo");
                    let _ = nix::unistd::close(sock);
                    return;
                };
                self.flow_table.start(index, FlowSlot::Ping6(IcmpEngine::new_flow(sock, id, seq, now)));
                self.icmp_by_id_v6[id as usize] = Some(index);
                let _ = self.dispatcher.register(sock, Interest::READABLE, Ref::new(RefType::Ping, sock, id.into()));
                index
            }
        };
        let FlowSlot::Ping6(record) = self.flow_table.get(index) else { return };
        let mut request = Icmp6::echo_request(id, seq);
        // The real source address is chosen by the kernel at send time and
        // isn't available to us up front; approximate with the gateway
        // address we present to the client, same as the reply path below.
        framing::icmp6_checksum(&mut request, self.dns.gateway, dst, data);
        let mut packet = vec![0u8; request.size().get() + data.len()];
        let _ = net::parse::DeParse::deparse(&request, &mut packet[..request.size().get()]);
        packet[request.size().get()..].copy_from_slice(data);
        let dest = SockaddrIn6::from(std::net::SocketAddrV6::new(dst, 0, 0, 0));
        let _ = socket::sendto(record.sock, &packet, &dest, MsgFlags::MSG_DONTWAIT);
        let _ = src;
    }

    fn handle_ping_socket(&mut self, reference: Ref, now: Duration) {
        let id = reference.payload as u16;
        let sock = reference.fd as RawFd;
        let mut buf = [0u8; 2048];
        match socket::recv(sock, &mut buf, MsgFlags::MSG_DONTWAIT) {
            Ok(n) => {
                if let Some((index, peer_mac)) = self.icmp_by_id_v4[id as usize].map(|i| (i, self.demux.peer_mac())) {
                    self.forward_icmp_reply_v4(index, &buf[..n], peer_mac, now);
                } else if let Some((index, peer_mac)) = self.icmp_by_id_v6[id as usize].map(|i| (i, self.demux.peer_mac())) {
                    self.forward_icmp_reply_v6(index, &buf[..n], peer_mac, now);
                }
            }
            Err(nix::Error::EAGAIN) => {}
            Err(e) => tracing::debug!(error = %e, "ping socket recv failed"),
        }
    }

    fn forward_icmp_reply_v4(&mut self, index: FlowIndex, buf: &[u8], peer_mac: Option<Mac>, _now: Duration) {
        let Some(client_mac) = peer_mac else { return };
        let FlowSlot::Ping4(record) = self.flow_table.get(index) else { return };
        let Ok((mut reply, consumed)) = Icmp4::parse(buf) else { return };
        if icmp::rewrite_reply_id_v4(&mut reply, record.id).is_err() {
            return;
        }
        let data = &buf[consumed.get()..];
        let mut out = vec![0u8; TAP_BUF_BYTES.min(2048).max(data.len() + 128)];
        if let Ok(len) = framing::icmp4(&mut out, client_mac, OUR_MAC, self.gateway_v4, self.guest_v4, reply, data) {
            let _ = self.transport.write_frame(&out[..len]);
        }
    }

    fn forward_icmp_reply_v6(&mut self, index: FlowIndex, buf: &[u8], peer_mac: Option<Mac>, _now: Duration) {
        let Some(client_mac) = peer_mac else { return };
        let FlowSlot::Ping6(record) = self.flow_table.get(index) else { return };
        let Ok((mut reply, consumed)) = Icmp6::parse(buf) else { return };
        if icmp::rewrite_reply_id_v6(&mut reply, record.id).is_err() {
            return;
        }
        let data = &buf[consumed.get()..];
        let mut out = vec![0u8; TAP_BUF_BYTES.min(2048).max(data.len() + 128)];
        let src = self.dns.gateway;
        let dst = self.dns.link_local;
        if let Ok(len) = framing::icmp6(&mut out, client_mac, OUR_MAC, src, dst, reply, data) {
            let _ = self.transport.write_frame(&out[..len]);
        }
    }

    // ---------------------------------------------------------------
    // TCP (§4.3)
    // ---------------------------------------------------------------

    fn handle_tcp_or_udp_v4(&mut self, batch: tap::FlowBatch, now: Duration) {
        if batch.key.protocol == ipv4::proto::TCP {
            self.handle_tcp_batch(batch, now, true);
        } else if batch.key.protocol == ipv4::proto::UDP {
            self.handle_udp_batch(batch, now, true);
        }
    }

    fn handle_tcp_or_udp_v6(&mut self, batch: tap::FlowBatch, now: Duration) {
        if batch.key.protocol == ipv4::proto::TCP {
            self.handle_tcp_batch(batch, now, false);
        } else if batch.key.protocol == ipv4::proto::UDP {
            self.handle_udp_batch(batch, now, false);
        }
    }

    fn handle_tcp_batch(&mut self, batch: tap::FlowBatch, now: Duration, is_v4: bool) {
        if !self.config.engines.tcp {
            return;
        }
        let Some(client_mac) = self.demux.peer_mac() else { return };
        for slot in &batch.frames {
            let eth_len = Eth::HEADER_LEN;
            let frame = &self.rx_buf[slot.offset..slot.offset + slot.len];
            let ip_len = if is_v4 {
                let Ok((_, c)) = Ipv4::parse(&frame[eth_len..]) else { continue };
                c.get()
            } else {
                let Ok((_, c)) = Ipv6::parse(&frame[eth_len..]) else { continue };
                c.get()
            };
            let l4 = &frame[eth_len + ip_len..];
            let Ok((tcp, consumed)) = Tcp::parse(l4) else { continue };
            let payload = &l4[consumed.get()..];
            self.handle_one_tcp_segment(batch.key, tcp, payload, client_mac, now, is_v4);
        }
    }

    fn handle_one_tcp_segment(
        &mut self,
        key: tap::FlowKey,
        tcp: Tcp,
        payload: &[u8],
        client_mac: Mac,
        now: Duration,
        is_v4: bool,
    ) {
        let tcp_key = TcpKey { faddr: key.dst, eport: key.sport, fport: key.dport };
        let existing = self.hash_index.lookup(tcp_key);

        let Some(index) = existing else {
            if tcp.syn() && !tcp.ack() {
                self.start_outbound_tcp(tcp_key, tcp, client_mac, now, is_v4);
            }
            return;
        };

        let FlowSlot::Tcp(record) = self.flow_table.get_mut(index) else { return };
        record.last_activity_ts = now.as_millis() as u64;

        if tcp.rst() {
            self.close_tcp(index, now);
            return;
        }

        if !record.events.contains(TcpEvents::ESTABLISHED) {
            // Waiting on the handshake ACK for a connection we originated
            // toward the tap side (our SYN-ACK already sent).
            if tcp.ack() && !tcp.syn() && payload.is_empty() {
                self.tcp_engine.on_handshake_ack(record);
            }
            return;
        }

        let mut plan = tcp::ClientSegmentPlan::default();
        let doff_bytes = tcp.header_len();
        let packet_len = doff_bytes + payload.len();
        if self
            .tcp_engine
            .fold_client_segment(
                record,
                tcp.sequence_number(),
                payload.len(),
                doff_bytes,
                packet_len,
                tcp.rst(),
                tcp.ack(),
                tcp.ack_number(),
                tcp.fin(),
                &mut plan,
            )
            .is_err()
        {
            return;
        }

        for (start, end) in &plan.iov_ranges {
            let _ = socket::send(record.sock, &payload[*start..*end], MsgFlags::MSG_DONTWAIT);
        }
        if plan.rst {
            self.close_tcp(index, now);
            return;
        }
        if plan.fin {
            let _ = nix::sys::socket::shutdown(record.sock, nix::sys::socket::Shutdown::Write);
        }
        if plan.fast_retransmit {
            record.seq_to_tap = record.seq_ack_from_tap;
        }
        if plan.fast_retransmit {
            self.drain_socket_to_client(index, client_mac, now, is_v4);
        }
    }

    fn start_outbound_tcp(&mut self, key: TcpKey, tcp: Tcp, client_mac: Mac, now: Duration, is_v4: bool) {
        if TcpEngine::validate_outbound_endpoint(key.faddr, key.fport, key.eport).is_err() {
            return;
        }
        let family = if key.faddr.to_ipv4_mapped().is_some() { AddressFamily::Inet } else { AddressFamily::Inet6 };
        let pooled = if family == AddressFamily::Inet { self.tcp_pool_v4.pop() } else { self.tcp_pool_v6.pop() };
        let sock = match pooled {
            Some(fd) => fd,
            None => {
                let Ok(fd) = self.tcp_engine.open_nonblocking_socket(family) else { return };
                fd
            }
        };
        self.tcp_engine.set_max_bufsize(sock);

        let Ok(index) = self.flow_table.alloc() else {
            tracing::warn!("flow table full, refusing new TCP connection");
            let _ = nix::unistd::close(sock);
            return;
        };
        let mut record = TcpRecord {
            key,
            sock,
            timer: None,
            events: {
                let mut e = TcpEvents::empty();
                e.set_fundamental(TcpEvents::TAP_SYN_RCVD);
                e
            },
            flags: TcpFlags::empty(),
            seq_to_tap: 0,
            seq_ack_from_tap: 0,
            seq_from_tap: 0,
            seq_ack_to_tap: 0,
            seq_init_from_tap: 0,
            seq_init_to_tap: 0,
            seq_dup_ack_approx: 0,
            wnd_from_tap: 0,
            wnd_to_tap: 0,
            ws_from_tap: 0,
            ws_to_tap: 0,
            mss: tcp::DEFAULT_MSS,
            retrans: 0,
            last_activity_ts: now.as_millis() as u64,
        };
        self.tcp_engine.on_client_syn_ack(
            &mut record,
            tcp.sequence_number(),
            tcp.mss(),
            tcp.window_scale(),
            tcp.window_size(),
        );

        let laddr = if is_v4 { self.guest_v4.to_ipv6_mapped() } else { self.dns.gateway };
        let connect_faddr = if self.config.map_gw {
            udp::remap_outbound_destination(&self.dns, key.faddr, key.fport, None)
        } else {
            key.faddr
        };
        match self.tcp_engine.connect_outbound(sock, connect_faddr, key.fport) {
            Ok(true) => {
                self.tcp_engine.on_connect_complete(&mut record, laddr, now);
                self.send_syn_ack(&mut record, client_mac, is_v4);
                self.flow_table.start(index, FlowSlot::Tcp(record));
                let _ = self.hash_index.insert(key, index);
                let _ = self.dispatcher.register(
                    sock,
                    Interest::READABLE,
                    Ref::new(RefType::Tcp, sock, index.get()),
                );
            }
            Ok(false) => {
                self.connecting.insert(sock);
                self.flow_table.start(index, FlowSlot::Tcp(record));
                let _ = self.hash_index.insert(key, index);
                let _ = self.dispatcher.register(
                    sock,
                    Interest::WRITABLE,
                    Ref::new(RefType::Tcp, sock, index.get()),
                );
            }
            Err(_) => {
                self.flow_table.alloc_cancel(index);
                let _ = nix::unistd::close(sock);
            }
        }
    }

    fn send_syn_ack(&mut self, record: &mut TcpRecord, client_mac: Mac, is_v4: bool) {
        let mut tcp = Tcp::new(record.key.eport, record.key.fport, record.seq_init_to_tap, 0xffff);
        tcp.set_syn(true);
        tcp.set_ack(true);
        tcp.set_ack_number(record.seq_ack_to_tap);
        tcp.set_mss(record.mss);
        if record.ws_from_tap > 0 {
            tcp.set_window_scale(record.ws_to_tap);
        }
        let (tcpi_snd_wnd, tcpi_min_rtt, sndbuf) = self.tcp_engine.sample_socket_state(record.key.faddr, record.sock);
        let window = self.tcp_engine.window_to_advertise(record.key.faddr, tcpi_snd_wnd, tcpi_min_rtt, sndbuf);
        if window == 0 {
            record.flags.insert(TcpFlags::ACK_TO_TAP_DUE);
        }
        tcp.set_window_size(window.min(u32::from(u16::MAX)) as u16);

        let mut out = vec![0u8; Tcp::MAX_LEN + if is_v4 { Ipv4::MIN_LEN } else { Ipv6::HEADER_LEN } + Eth::HEADER_LEN];
        let result = if is_v4 {
            let faddr = record.key.faddr.to_ipv4_mapped().unwrap_or(self.gateway_v4);
            framing::tcp_v4(&mut out, client_mac, OUR_MAC, faddr, self.guest_v4, tcp, &[])
        } else {
            framing::tcp_v6(&mut out, client_mac, OUR_MAC, record.key.faddr, self.dns.gateway, tcp, &[])
        };
        if let Ok(len) = result {
            let _ = self.transport.write_frame(&out[..len]);
        }
    }

    fn handle_tcp_socket(&mut self, index: FlowIndex, now: Duration) {
        if index.get() as usize >= self.flow_table.capacity() as usize {
            return;
        }
        let Some(client_mac) = self.demux.peer_mac() else { return };
        let (sock, is_v4) = {
            let FlowSlot::Tcp(record) = self.flow_table.get(index) else { return };
            (record.sock, record.key.faddr.to_ipv4_mapped().is_some())
        };
        if self.connecting.contains(&sock) {
            self.complete_outbound_connect(index, sock, client_mac, now, is_v4);
            return;
        }
        self.drain_socket_to_client(index, client_mac, now, is_v4);
    }

    fn complete_outbound_connect(&mut self, index: FlowIndex, sock: RawFd, client_mac: Mac, now: Duration, is_v4: bool) {
        let connected = match socket::getsockopt(&unsafe { std::os::fd::BorrowedFd::borrow_raw(sock) }, sockopt::SocketError) {
            Ok(0) => true,
            Ok(_) | Err(_) => false,
        };
        if !connected {
            // Spurious writable wakeup or connect still not settled; the
            // fallback noted in DESIGN.md (re-`connect()` and check
            // `EISCONN`) would replace this check if `SocketError` turns
            // out not to be available.
            return;
        }
        self.connecting.remove(&sock);
        let laddr = if is_v4 { self.guest_v4.to_ipv6_mapped() } else { self.dns.gateway };
        let FlowSlot::Tcp(record) = self.flow_table.get_mut(index) else { return };
        self.tcp_engine.on_connect_complete(record, laddr, now);
        let mut snapshot = clone_tcp_record(record);
        self.send_syn_ack(&mut snapshot, client_mac, is_v4);
        if let FlowSlot::Tcp(record) = self.flow_table.get_mut(index) {
            record.flags = snapshot.flags;
        }
        let _ = self.dispatcher.reregister(sock, Interest::READABLE, Ref::new(RefType::Tcp, sock, index.get()));
    }

    fn drain_socket_to_client(&mut self, index: FlowIndex, client_mac: Mac, now: Duration, is_v4: bool) {
        let sock;
        let faddr;
        let client_window;
        {
            let FlowSlot::Tcp(record) = self.flow_table.get(index) else { return };
            sock = record.sock;
            faddr = record.key.faddr;
            client_window = u32::from(record.wnd_from_tap) << record.ws_from_tap;
        }
        let mut buf = vec![0u8; 65536];
        let (n, eof) = match socket::recv(sock, &mut buf, MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_PEEK) {
            Ok(0) => (0, true),
            Ok(n) => (n, false),
            Err(nix::Error::EAGAIN) => return,
            Err(_) => (0, true),
        };
        let segments = {
            let FlowSlot::Tcp(record) = self.flow_table.get(index) else { return };
            self.tcp_engine.plan_socket_to_client(record, n, client_window, eof)
        };
        let (tcpi_snd_wnd, tcpi_min_rtt, sndbuf) = self.tcp_engine.sample_socket_state(faddr, sock);
        let window = self.tcp_engine.window_to_advertise(faddr, tcpi_snd_wnd, tcpi_min_rtt, sndbuf);
        let window16 = window.min(u32::from(u16::MAX)) as u16;
        if window == 0 {
            if let FlowSlot::Tcp(record) = self.flow_table.get_mut(index) {
                record.flags.insert(TcpFlags::ACK_TO_TAP_DUE);
            }
        }
        for seg in &segments {
            let snapshot = {
                let FlowSlot::Tcp(record) = self.flow_table.get(index) else { continue };
                clone_tcp_record(record)
            };
            let mut tcp = Tcp::new(snapshot.key.eport, snapshot.key.fport, seg.seq, 0xffff);
            tcp.set_ack(true);
            tcp.set_ack_number(snapshot.seq_ack_to_tap);
            tcp.set_fin(seg.fin);
            tcp.set_window_size(window16);

            let mut out = vec![0u8; Tcp::MAX_LEN + Ipv6::HEADER_LEN + Eth::HEADER_LEN + seg.len];
            let result = if is_v4 {
                let faddr = snapshot.key.faddr.to_ipv4_mapped().unwrap_or(self.gateway_v4);
                framing::tcp_v4(&mut out, client_mac, OUR_MAC, faddr, self.guest_v4, tcp, &buf[seg.offset..seg.offset + seg.len])
            } else {
                framing::tcp_v6(&mut out, client_mac, OUR_MAC, snapshot.key.faddr, self.dns.gateway, tcp, &buf[seg.offset..seg.offset + seg.len])
            };
            if let Ok(len) = result {
                let _ = self.transport.write_frame(&out[..len]);
            }
            if let FlowSlot::Tcp(record) = self.flow_table.get_mut(index) {
                record.seq_to_tap = seg.seq.wrapping_add(seg.len as u32).wrapping_add(u32::from(seg.fin));
                record.last_activity_ts = now.as_millis() as u64;
            }
        }
        if eof {
            if let FlowSlot::Tcp(record) = self.flow_table.get_mut(index) {
                record.events.insert(TcpEvents::SOCK_FIN_RCVD);
            }
        }
    }

    fn close_tcp(&mut self, index: FlowIndex, _now: Duration) {
        if let FlowSlot::Tcp(record) = self.flow_table.get(index) {
            let _ = self.dispatcher.deregister(record.sock);
            let _ = nix::unistd::close(record.sock);
            let _ = self.hash_index.remove(record.key);
            self.connecting.remove(&record.sock);
        }
        self.flow_table.alloc_cancel(index);
    }

    fn accept_forwarded_tcp(&mut self, listener: RawFd, now: Duration) {
        let Ok(accepted) = socket::accept(listener) else { return };
        let Some(client_mac) = self.demux.peer_mac() else {
            let _ = nix::unistd::close(accepted);
            return;
        };
        let Ok(peer) = socket::getpeername::<SockaddrStorage>(accepted) else {
            let _ = nix::unistd::close(accepted);
            return;
        };
        let (faddr, fport) = match (peer.as_sockaddr_in(), peer.as_sockaddr_in6()) {
            (Some(v4), _) => (std::net::Ipv4Addr::from(v4.ip()).to_ipv6_mapped(), v4.port()),
            (_, Some(v6)) => (v6.ip(), v6.port()),
            _ => {
                let _ = nix::unistd::close(accepted);
                return;
            }
        };
        let Ok(local) = socket::getsockname::<SockaddrStorage>(listener) else {
            let _ = nix::unistd::close(accepted);
            return;
        };
        let eport = local.as_sockaddr_in().map(SockaddrIn::port).or_else(|| local.as_sockaddr_in6().map(SockaddrIn6::port)).unwrap_or(0);

        let key = TcpKey { faddr, eport, fport };
        let Ok(index) = self.flow_table.alloc() else {
            let _ = nix::unistd::close(accepted);
            return;
        };
        let mut record = self.tcp_engine.accept_inbound(key, self.guest_v4.to_ipv6_mapped(), accepted, now);
        record.flags.insert(TcpFlags::ACK_FROM_TAP_DUE);
        self.send_initial_syn(&record, client_mac, true);
        self.flow_table.start(index, FlowSlot::Tcp(record));
        let _ = self.hash_index.insert(key, index);
        let _ = self.dispatcher.register(
            accepted,
            Interest::READABLE,
            Ref::new(RefType::Tcp, accepted, index.get()),
        );
    }

    fn send_initial_syn(&mut self, record: &TcpRecord, client_mac: Mac, is_v4: bool) {
        let mut tcp = Tcp::new(record.key.eport, record.key.fport, record.seq_init_to_tap, 0xffff);
        tcp.set_syn(true);
        let mut out = vec![0u8; Tcp::MAX_LEN + Ipv4::MIN_LEN + Eth::HEADER_LEN];
        if is_v4 {
            let faddr = record.key.faddr.to_ipv4_mapped().unwrap_or(self.gateway_v4);
            if let Ok(len) = framing::tcp_v4(&mut out, client_mac, OUR_MAC, faddr, self.guest_v4, tcp, &[]) {
                let _ = self.transport.write_frame(&out[..len]);
            }
        } else if let Ok(len) = framing::tcp_v6(&mut out, client_mac, OUR_MAC, record.key.faddr, self.dns.gateway, tcp, &[]) {
            let _ = self.transport.write_frame(&out[..len]);
        }
    }

    // ---------------------------------------------------------------
    // UDP (§4.4)
    // ---------------------------------------------------------------

    fn handle_udp_batch(&mut self, batch: tap::FlowBatch, now: Duration, is_v4: bool) {
        if !self.config.engines.udp {
            return;
        }
        let Some(client_mac) = self.demux.peer_mac() else { return };
        for slot in &batch.frames {
            let eth_len = Eth::HEADER_LEN;
            let frame = &self.rx_buf[slot.offset..slot.offset + slot.len];
            let ip_len = if is_v4 {
                let Ok((_, c)) = Ipv4::parse(&frame[eth_len..]) else { continue };
                c.get()
            } else {
                let Ok((_, c)) = Ipv6::parse(&frame[eth_len..]) else { continue };
                c.get()
            };
            let l4 = &frame[eth_len + ip_len..];
            let Ok((udp, consumed)) = net::udp::Udp::parse(l4) else { continue };
            let payload = &l4[consumed.get()..];
            self.handle_one_udp_datagram(batch.key, udp.source(), udp.destination(), payload, client_mac, now, is_v4);
        }
    }

    fn handle_one_udp_datagram(
        &mut self,
        key: tap::FlowKey,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
        _client_mac: Mac,
        now: Duration,
        is_v4: bool,
    ) {
        let table = if is_v4 { &mut self.udp_tables.v4 } else { &mut self.udp_tables.v6 };
        let peers = if is_v4 { &mut self.udp_peers_v4 } else { &mut self.udp_peers_v6 };
        if table.get(src_port).is_none() {
            let family = if is_v4 { AddressFamily::Inet } else { AddressFamily::Inet6 };
            let Ok(sock) = udp::open_nonblocking(family) else { return };
            table.insert(src_port, UdpPortEntry { sock, flags: UdpFlags::empty(), last_seen: now });
            let _ = self.dispatcher.register(sock, Interest::READABLE, Ref::new(RefType::Udp, sock, u32::from(src_port)));
        }
        let peer = peers.entry(src_port).or_default();
        peer.tap_addr = Some(key.src);
        let last_host = peer.last_host_addr;

        let remapped = udp::remap_outbound_destination(&self.dns, key.dst, dst_port, last_host);
        let Some(entry) = table.get_mut(src_port) else { return };
        entry.last_seen = now;
        table.mark_active(src_port);

        let sock = table.get(src_port).unwrap().sock;
        if is_v4 {
            if let Some(v4) = remapped.to_ipv4_mapped() {
                let addr = SockaddrIn::from(std::net::SocketAddrV4::new(v4, dst_port));
                let _ = socket::sendto(sock, payload, &addr, MsgFlags::MSG_DONTWAIT);
            }
        } else {
            let addr = SockaddrIn6::from(std::net::SocketAddrV6::new(remapped, dst_port, 0, 0));
            let _ = socket::sendto(sock, payload, &addr, MsgFlags::MSG_DONTWAIT);
        }
    }

    fn handle_udp_socket(&mut self, reference: Ref, now: Duration) {
        let port = (reference.payload & 0xffff) as u16;
        let is_forward = reference.payload & UDP_FORWARD_TAG != 0;
        let sock = reference.fd as RawFd;
        let Some(client_mac) = self.demux.peer_mac() else { return };

        let mut bufs: Vec<Vec<u8>> = (0..udp::UDP_MAX_FRAMES).map(|_| vec![0u8; 65536]).collect();
        let Ok(datagrams) = udp::recv_batch(sock, &mut bufs) else { return };
        for (i, dgram) in datagrams.iter().enumerate() {
            let Some(from) = &dgram.from else { continue };
            let (source, source_port, is_v4) = match (from.as_sockaddr_in(), from.as_sockaddr_in6()) {
                (Some(v4), _) => (std::net::Ipv4Addr::from(v4.ip()).to_ipv6_mapped(), v4.port(), true),
                (_, Some(v6)) => (v6.ip(), v6.port(), false),
                _ => continue,
            };
            let table = if is_v4 { &mut self.udp_tables.v4 } else { &mut self.udp_tables.v6 };
            let peers = if is_v4 { &mut self.udp_peers_v4 } else { &mut self.udp_peers_v6 };
            let peer_entry = peers.entry(port).or_default();
            peer_entry.last_host_addr = Some(source);
            let Some(tap_addr) = peer_entry.tap_addr.or(if is_forward { Some(if is_v4 { self.guest_v4.to_ipv6_mapped() } else { self.dns.gateway }) } else { None }) else { continue };

            if let Some(entry) = table.get_mut(port) {
                entry.last_seen = now;
            }
            table.mark_active(port);

            let remapped_src = udp::remap_inbound_source(&self.dns, source, port, Some(tap_addr));
            let mut out = vec![0u8; TAP_BUF_BYTES.min(65536 + 64)];
            let result = if is_v4 {
                let src_v4 = remapped_src.to_ipv4_mapped().unwrap_or(self.gateway_v4);
                let dst_v4 = tap_addr.to_ipv4_mapped().unwrap_or(self.guest_v4);
                framing::udp_v4(&mut out, client_mac, OUR_MAC, src_v4, dst_v4, source_port, port, &bufs[i][..dgram.len])
            } else {
                framing::udp_v6(&mut out, client_mac, OUR_MAC, remapped_src, tap_addr, source_port, port, &bufs[i][..dgram.len])
            };
            if let Ok(len) = result {
                let _ = self.transport.write_frame(&out[..len]);
            }
        }
    }

    // ---------------------------------------------------------------
    // Periodic tick (§4.6 step 3)
    // ---------------------------------------------------------------

    fn tick(&mut self, now: Duration) {
        let mut to_retransmit: Vec<FlowIndex> = Vec::new();
        let mut to_ack: Vec<FlowIndex> = Vec::new();
        let closed = self.flow_table.defer_sweep(|idx, slot| match slot {
            FlowSlot::Tcp(record) => match tcp_sweep_action(record, now) {
                TcpSweepAction::Close => true,
                TcpSweepAction::Retransmit => {
                    record.retrans += 1;
                    record.seq_to_tap = record.seq_ack_from_tap;
                    record.last_activity_ts = now.as_millis() as u64;
                    to_retransmit.push(idx);
                    false
                }
                TcpSweepAction::SendPendingAck => {
                    to_ack.push(idx);
                    false
                }
                TcpSweepAction::Stale => false,
            },
            FlowSlot::Ping4(record) | FlowSlot::Ping6(record) => IcmpEngine::is_expired(record, now),
            FlowSlot::Free { .. } | FlowSlot::Allocated => false,
        });
        for (index, slot) in closed {
            match slot {
                FlowSlot::Tcp(record) => {
                    let _ = self.dispatcher.deregister(record.sock);
                    let _ = nix::unistd::close(record.sock);
                    let _ = self.hash_index.remove(record.key);
                    self.connecting.remove(&record.sock);
                }
                FlowSlot::Ping4(record) | FlowSlot::Ping6(record) => {
                    let _ = self.dispatcher.deregister(record.sock);
                    let _ = nix::unistd::close(record.sock);
                    self.icmp_by_id_v4[record.id as usize] = None;
                    self.icmp_by_id_v6[record.id as usize] = None;
                }
                FlowSlot::Free { .. } | FlowSlot::Allocated => {}
            }
            let _ = index;
        }
        for index in to_retransmit {
            self.retransmit_tcp(index, now);
        }
        for index in to_ack {
            self.send_pending_ack(index, now);
        }

        for (port, entry) in self.udp_tables.v4.sweep(now) {
            let _ = self.dispatcher.deregister(entry.sock);
            let _ = nix::unistd::close(entry.sock);
            self.udp_peers_v4.remove(&port);
        }
        for (port, entry) in self.udp_tables.v6.sweep(now) {
            let _ = self.dispatcher.deregister(entry.sock);
            let _ = nix::unistd::close(entry.sock);
            self.udp_peers_v6.remove(&port);
        }

        self.refill_tcp_pool(AddressFamily::Inet);
        self.refill_tcp_pool(AddressFamily::Inet6);
    }

    /// `TimerAction::Retransmit` fired: `seq_to_tap` was already rolled back
    /// to `seq_ack_from_tap` by the sweep closure, so re-peeking the socket
    /// from its current position naturally resends the unacked window.
    fn retransmit_tcp(&mut self, index: FlowIndex, now: Duration) {
        let Some(client_mac) = self.demux.peer_mac() else { return };
        let is_v4 = match self.flow_table.get(index) {
            FlowSlot::Tcp(record) => record.key.faddr.to_ipv4_mapped().is_some(),
            _ => return,
        };
        self.drain_socket_to_client(index, client_mac, now, is_v4);
    }

    /// `TimerAction::SendPendingAck` fired: emit a pure ACK carrying the
    /// current advertised window, clearing `ACK_TO_TAP_DUE` once that window
    /// is no longer zero (§4.3 Window tracking).
    fn send_pending_ack(&mut self, index: FlowIndex, now: Duration) {
        let Some(client_mac) = self.demux.peer_mac() else { return };
        let mut snapshot = {
            let FlowSlot::Tcp(record) = self.flow_table.get(index) else { return };
            clone_tcp_record(record)
        };
        let is_v4 = snapshot.key.faddr.to_ipv4_mapped().is_some();

        let mut tcp = Tcp::new(snapshot.key.eport, snapshot.key.fport, snapshot.seq_to_tap, 0xffff);
        tcp.set_ack(true);
        tcp.set_ack_number(snapshot.seq_ack_to_tap);
        let (tcpi_snd_wnd, tcpi_min_rtt, sndbuf) = self.tcp_engine.sample_socket_state(snapshot.key.faddr, snapshot.sock);
        let window = self.tcp_engine.window_to_advertise(snapshot.key.faddr, tcpi_snd_wnd, tcpi_min_rtt, sndbuf);
        tcp.set_window_size(window.min(u32::from(u16::MAX)) as u16);
        if window > 0 {
            snapshot.flags.remove(TcpFlags::ACK_TO_TAP_DUE);
        }

        let mut out = vec![0u8; Tcp::MAX_LEN + Ipv6::HEADER_LEN + Eth::HEADER_LEN];
        let result = if is_v4 {
            let faddr = snapshot.key.faddr.to_ipv4_mapped().unwrap_or(self.gateway_v4);
            framing::tcp_v4(&mut out, client_mac, OUR_MAC, faddr, self.guest_v4, tcp, &[])
        } else {
            framing::tcp_v6(&mut out, client_mac, OUR_MAC, snapshot.key.faddr, self.dns.gateway, tcp, &[])
        };
        if let Ok(len) = result {
            let _ = self.transport.write_frame(&out[..len]);
        }
        if let FlowSlot::Tcp(record) = self.flow_table.get_mut(index) {
            record.flags = snapshot.flags;
            record.last_activity_ts = now.as_millis() as u64;
        }
    }
}

/// Bit tagging a [`RefType::Udp`] payload as belonging to a forwarded
/// listener port rather than a tap-originated pseudo-connection, since
/// both share the same `RefType`.
const UDP_FORWARD_TAG: u32 = 1 << 16;

/// What a periodic sweep pass should do about one TCP flow (§4.3 timers).
enum TcpSweepAction {
    /// Tear the flow down (`events.is_closed()` or `TimerAction::Reset`).
    Close,
    /// `TimerAction::Retransmit` fired: roll `seq_to_tap` back and redrive
    /// the socket-to-client path.
    Retransmit,
    /// `TimerAction::SendPendingAck` fired: a window update is owed.
    SendPendingAck,
    /// `TimerAction::Stale`: nothing due yet.
    Stale,
}

fn tcp_sweep_action(record: &TcpRecord, now: Duration) -> TcpSweepAction {
    if record.events.is_closed() {
        return TcpSweepAction::Close;
    }
    let deadline = Duration::from_millis(record.last_activity_ts)
        + tcp::next_deadline(record.events, record.flags);
    match tcp::on_fire(now, deadline, record.events, record.flags, record.retrans) {
        TimerAction::Reset => TcpSweepAction::Close,
        TimerAction::Retransmit => TcpSweepAction::Retransmit,
        TimerAction::SendPendingAck => TcpSweepAction::SendPendingAck,
        TimerAction::Stale => TcpSweepAction::Stale,
    }
}

fn open_tcp_listener(port: u16) -> std::io::Result<RawFd> {
    use std::os::fd::IntoRawFd;
    let fd = socket::socket(AddressFamily::Inet, SockType::Stream, SockFlag::SOCK_NONBLOCK, None)?;
    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    socket::bind(fd.as_raw_fd(), &SockaddrIn::from(std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))?;
    socket::listen(&fd, socket::Backlog::new(16)?)?;
    Ok(fd.into_raw_fd())
}

fn open_udp_listener(port: u16) -> std::io::Result<RawFd> {
    use std::os::fd::IntoRawFd;
    let fd = socket::socket(AddressFamily::Inet, SockType::Datagram, SockFlag::SOCK_NONBLOCK, None)?;
    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    socket::bind(fd.as_raw_fd(), &SockaddrIn::from(std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))?;
    Ok(fd.into_raw_fd())
}

fn open_ping_socket(family: AddressFamily) -> nix::Result<RawFd> {
    use std::os::fd::IntoRawFd;
    let protocol = if family == AddressFamily::Inet { SockProtocol::Icmp } else { SockProtocol::IcmpV6 };
    let fd = socket::socket(family, SockType::Datagram, SockFlag::SOCK_NONBLOCK, protocol)?;
    let bound = match family {
        AddressFamily::Inet => {
            socket::bind(fd.as_raw_fd(), &SockaddrIn::from(std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
        }
        _ => socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(std::net::SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0))),
    };
    bound?;
    Ok(fd.into_raw_fd())
}

fn random_bytes() -> [u8; 8] {
    let mut buf = [0u8; 8];
    let _ = getrandom::getrandom(&mut buf);
    buf
}

fn monotonic_now() -> Duration {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(std::time::Instant::now);
    std::time::Instant::now().saturating_duration_since(start)
}

/// Cheap clone of the fields [`send_syn_ack`]/[`drain_socket_to_client`]
/// need after releasing the mutable borrow on `flow_table`.
fn clone_tcp_record(record: &TcpRecord) -> TcpRecord {
    TcpRecord {
        key: record.key,
        sock: record.sock,
        timer: record.timer,
        events: record.events,
        flags: record.flags,
        seq_to_tap: record.seq_to_tap,
        seq_ack_from_tap: record.seq_ack_from_tap,
        seq_from_tap: record.seq_from_tap,
        seq_ack_to_tap: record.seq_ack_to_tap,
        seq_init_from_tap: record.seq_init_from_tap,
        seq_init_to_tap: record.seq_init_to_tap,
        seq_dup_ack_approx: record.seq_dup_ack_approx,
        wnd_from_tap: record.wnd_from_tap,
        wnd_to_tap: record.wnd_to_tap,
        ws_from_tap: record.ws_from_tap,
        ws_to_tap: record.ws_to_tap,
        mss: record.mss,
        retrans: record.retrans,
        last_activity_ts: record.last_activity_ts,
    }
}
