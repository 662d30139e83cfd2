// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Assembling outbound Ethernet/IP/L4 frames from already-built header
//! values, grounded on the `Parse`/`DeParse` round-trip contract in
//! `net/src/parse.rs` and the checksum helpers in `net/src/checksum.rs`.
//!
//! Nothing here decides *what* to send; `tcp`/`udp`/`icmp` engines hand
//! back header values and payload ranges, and this module is the one place
//! that knows how to lay them out on the wire, including the pseudo-header
//! checksum.

use net::checksum;
use net::eth::{ethertype, Eth, Mac};
use net::icmp::{Icmp4, Icmp6};
use net::ipv4::{proto, Ipv4};
use net::ipv6::Ipv6;
use net::parse::DeParse;
use net::tcp::Tcp;
use net::udp::Udp;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Error assembling an outbound frame.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame does not fit in the supplied buffer")]
    BufferTooSmall,
    #[error("header failed to serialize")]
    DeParse,
}

fn ipv4_pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: u16) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&src.octets());
    buf[4..8].copy_from_slice(&dst.octets());
    buf[9] = protocol;
    buf[10..12].copy_from_slice(&len.to_be_bytes());
    buf
}

fn ipv6_pseudo_header(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, len: u32) -> [u8; 40] {
    let mut buf = [0u8; 40];
    buf[0..16].copy_from_slice(&src.octets());
    buf[16..32].copy_from_slice(&dst.octets());
    buf[32..36].copy_from_slice(&len.to_be_bytes());
    buf[39] = next_header;
    buf
}

fn write_header(header: &impl DeParse, buf: &mut [u8]) -> Result<usize, FramingError> {
    header
        .deparse(buf)
        .map(|n| n.get())
        .map_err(|_| FramingError::DeParse)
}

/// Lay out `eth || ip(v4) || tcp || payload` into `buf`, filling the TCP
/// checksum. Returns the total frame length.
pub fn tcp_v4(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    mut tcp: Tcp,
    payload: &[u8],
) -> Result<usize, FramingError> {
    let tcp_len = u16::try_from(tcp.header_len() + payload.len()).map_err(|_| FramingError::BufferTooSmall)?;
    let pseudo = ipv4_pseudo_header(src, dst, proto::TCP, tcp_len);
    tcp.set_checksum(0);
    let mut scratch = vec![0u8; tcp.header_len()];
    write_header(&tcp, &mut scratch)?;
    let sum = checksum::accumulate(checksum::accumulate(0, &pseudo), &scratch);
    let sum = checksum::accumulate(sum, payload);
    tcp.set_checksum(checksum::fold_checksum(sum));

    let mut ip = Ipv4::new(tcp_len, 64, proto::TCP, src, dst).map_err(|_| FramingError::BufferTooSmall)?;
    ip.update_checksum();
    assemble_v4(buf, client_mac, our_mac, &ip, &tcp, payload)
}

/// Same as [`tcp_v4`] for IPv6.
pub fn tcp_v6(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    mut tcp: Tcp,
    payload: &[u8],
) -> Result<usize, FramingError> {
    let tcp_len = u16::try_from(tcp.header_len() + payload.len()).map_err(|_| FramingError::BufferTooSmall)?;
    let pseudo = ipv6_pseudo_header(src, dst, proto::TCP, u32::from(tcp_len));
    tcp.set_checksum(0);
    let mut scratch = vec![0u8; tcp.header_len()];
    write_header(&tcp, &mut scratch)?;
    let sum = checksum::accumulate(checksum::accumulate(0, &pseudo), &scratch);
    let sum = checksum::accumulate(sum, payload);
    tcp.set_checksum(checksum::fold_checksum(sum));

    let ip = Ipv6::new(tcp_len, proto::TCP, 64, src, dst);
    assemble_v6(buf, client_mac, our_mac, &ip, &tcp, payload)
}

/// Lay out `eth || ip(v4) || udp || payload`, filling the UDP checksum.
pub fn udp_v4(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Result<usize, FramingError> {
    let udp_len = u16::try_from(8 + payload.len()).map_err(|_| FramingError::BufferTooSmall)?;
    let mut udp = Udp::new(src_port, dst_port, udp_len, 0);
    let pseudo = ipv4_pseudo_header(src, dst, proto::UDP, udp_len);
    let mut scratch = [0u8; 8];
    write_header(&udp, &mut scratch)?;
    let sum = checksum::accumulate(checksum::accumulate(0, &pseudo), &scratch);
    let sum = checksum::accumulate(sum, payload);
    udp.set_checksum(checksum::fold_checksum(sum));

    let mut ip = Ipv4::new(udp_len, 64, proto::UDP, src, dst).map_err(|_| FramingError::BufferTooSmall)?;
    ip.update_checksum();
    assemble_v4(buf, client_mac, our_mac, &ip, &udp, payload)
}

/// Same as [`udp_v4`] for IPv6.
pub fn udp_v6(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Result<usize, FramingError> {
    let udp_len = u16::try_from(8 + payload.len()).map_err(|_| FramingError::BufferTooSmall)?;
    let mut udp = Udp::new(src_port, dst_port, udp_len, 0);
    let pseudo = ipv6_pseudo_header(src, dst, proto::UDP, u32::from(udp_len));
    let mut scratch = [0u8; 8];
    write_header(&udp, &mut scratch)?;
    let sum = checksum::accumulate(checksum::accumulate(0, &pseudo), &scratch);
    let sum = checksum::accumulate(sum, payload);
    udp.set_checksum(checksum::fold_checksum(sum));

    let ip = Ipv6::new(udp_len, proto::UDP, 64, src, dst);
    assemble_v6(buf, client_mac, our_mac, &ip, &udp, payload)
}

/// Lay out `eth || ip(v4) || icmp || payload` (echo request or reply),
/// computing both the IP and ICMP checksums.
pub fn icmp4(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    mut icmp: Icmp4,
    payload: &[u8],
) -> Result<usize, FramingError> {
    icmp4_checksum(&mut icmp, payload);

    let total = u16::try_from(icmp.size().get() + payload.len()).map_err(|_| FramingError::BufferTooSmall)?;
    let mut ip = Ipv4::new(total, 64, proto::ICMP, src, dst).map_err(|_| FramingError::BufferTooSmall)?;
    ip.update_checksum();
    assemble_v4(buf, client_mac, our_mac, &ip, &icmp, payload)
}

/// Same as [`icmp4`] for IPv6 (`ICMPv6` checksum needs the pseudo-header,
/// unlike `ICMPv4`).
pub fn icmp6(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    mut icmp: Icmp6,
    payload: &[u8],
) -> Result<usize, FramingError> {
    let total = u16::try_from(icmp.size().get() + payload.len()).map_err(|_| FramingError::BufferTooSmall)?;
    icmp6_checksum(&mut icmp, src, dst, payload);

    let ip = Ipv6::new(total, 58, 64, src, dst);
    assemble_v6(buf, client_mac, our_mac, &ip, &icmp, payload)
}

/// Compute and fill in an ICMPv4 message's own checksum (no pseudo-header),
/// covering the header plus whatever echo data trails it. Used both when
/// framing a reply for the tap side and when building a request to hand to
/// a Linux ping socket, which — unlike UDP/TCP — does not compute this
/// checksum on the caller's behalf.
pub(crate) fn icmp4_checksum(icmp: &mut Icmp4, payload: &[u8]) {
    icmp.set_checksum(0);
    let mut scratch = vec![0u8; icmp.size().get()];
    let _ = write_header(icmp, &mut scratch);
    let sum = checksum::accumulate(checksum::accumulate(0, &scratch), payload);
    icmp.set_checksum(checksum::fold_checksum(sum));
}

/// Same as [`icmp4_checksum`] but over the IPv6 pseudo-header, per RFC 4443.
pub(crate) fn icmp6_checksum(icmp: &mut Icmp6, src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8]) {
    icmp.set_checksum(0);
    let mut scratch = vec![0u8; icmp.size().get()];
    let _ = write_header(icmp, &mut scratch);
    let pseudo = ipv6_pseudo_header(src, dst, 58, (scratch.len() + payload.len()) as u32);
    let sum = checksum::accumulate(checksum::accumulate(0, &pseudo), &scratch);
    let sum = checksum::accumulate(sum, payload);
    icmp.set_checksum(checksum::fold_checksum(sum));
}

fn assemble_v4(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    ip: &Ipv4,
    l4: &impl DeParse,
    payload: &[u8],
) -> Result<usize, FramingError> {
    let eth = Eth::new(our_mac, client_mac, ethertype::IPV4);
    let mut offset = write_header(&eth, buf)?;
    offset += write_header(ip, &mut buf[offset..])?;
    offset += write_header(l4, &mut buf[offset..])?;
    let end = offset + payload.len();
    if end > buf.len() {
        return Err(FramingError::BufferTooSmall);
    }
    buf[offset..end].copy_from_slice(payload);
    Ok(end)
}

fn assemble_v6(
    buf: &mut [u8],
    client_mac: Mac,
    our_mac: Mac,
    ip: &Ipv6,
    l4: &impl DeParse,
    payload: &[u8],
) -> Result<usize, FramingError> {
    let eth = Eth::new(our_mac, client_mac, ethertype::IPV6);
    let mut offset = write_header(&eth, buf)?;
    offset += write_header(ip, &mut buf[offset..])?;
    offset += write_header(l4, &mut buf[offset..])?;
    let end = offset + payload.len();
    if end > buf.len() {
        return Err(FramingError::BufferTooSmall);
    }
    buf[offset..end].copy_from_slice(payload);
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::parse::Parse;

    #[test]
    fn udp_v4_round_trips_through_parse() {
        let mut buf = [0u8; 128];
        let len = udp_v4(
            &mut buf,
            [1, 2, 3, 4, 5, 6],
            [6, 5, 4, 3, 2, 1],
            Ipv4Addr::new(10, 0, 2, 3),
            Ipv4Addr::new(10, 0, 2, 15),
            53,
            54321,
            b"hello",
        )
        .unwrap();
        let (eth, consumed) = Eth::parse(&buf[..len]).unwrap();
        assert_eq!(eth.ether_type(), ethertype::IPV4);
        let (ip, consumed2) = Ipv4::parse(&buf[consumed.get()..len]).unwrap();
        assert_eq!(ip.protocol(), proto::UDP);
        let l4_start = consumed.get() + consumed2.get();
        let (udp, consumed3) = Udp::parse(&buf[l4_start..len]).unwrap();
        assert_eq!(udp.source(), 53);
        assert_eq!(udp.destination(), 54321);
        assert_eq!(&buf[l4_start + consumed3.get()..len], b"hello");
    }

    #[test]
    fn tcp_v4_checksum_is_valid() {
        let mut buf = [0u8; 128];
        let tcp = Tcp::new(443, 50000, 1000, 65535);
        let len = tcp_v4(
            &mut buf,
            [1, 2, 3, 4, 5, 6],
            [6, 5, 4, 3, 2, 1],
            Ipv4Addr::new(203, 0, 113, 9),
            Ipv4Addr::new(10, 0, 2, 15),
            tcp,
            b"abc",
        )
        .unwrap();
        let (_, consumed) = Eth::parse(&buf[..len]).unwrap();
        let (ip, consumed2) = Ipv4::parse(&buf[consumed.get()..len]).unwrap();
        let l4_start = consumed.get() + consumed2.get();
        let pseudo = ipv4_pseudo_header(ip.source(), ip.destination(), proto::TCP, (len - l4_start) as u16);
        assert!(checksum::csum_is_valid(&pseudo, &buf[l4_start..len]));
    }
}
