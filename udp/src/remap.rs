// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Address remapping for the two directions of §4.4: inbound (host → tap)
//! source rewriting and outbound (tap → host) destination rewriting.

use std::net::Ipv6Addr;

/// The configured DNS/gateway aliasing endpoints a datagram's addresses
/// are checked against.
#[derive(Debug, Clone, Copy)]
pub struct DnsGateway {
    /// Host-side resolver address datagrams to port 53 are really bound for.
    pub host_dns: Ipv6Addr,
    /// Tap-facing alias clients should see as the DNS server.
    pub tap_dns_alias: Ipv6Addr,
    /// Tap-facing gateway address.
    pub gateway: Ipv6Addr,
    /// Our own link-local address, used as the v6 "gateway" stand-in.
    pub link_local: Ipv6Addr,
}

/// Decide the source address to present on an inbound (host → client)
/// datagram (§4.4 "For each inbound datagram").
///
/// `last_seen_tap` is the most recent tap-side peer address observed on
/// this port, used to recognize "the host answering back as itself".
#[must_use]
pub fn remap_inbound_source(
    cfg: &DnsGateway,
    source: Ipv6Addr,
    dest_port: u16,
    last_seen_tap: Option<Ipv6Addr>,
) -> Ipv6Addr {
    if dest_port == 53 && source == cfg.host_dns {
        return cfg.tap_dns_alias;
    }
    if source.is_loopback() || Some(source) == last_seen_tap {
        return cfg.gateway;
    }
    source
}

/// Decide the destination address to dial for an outbound (client → host)
/// datagram (§4.4 "Translate destination").
#[must_use]
pub fn remap_outbound_destination(
    cfg: &DnsGateway,
    destination: Ipv6Addr,
    dest_port: u16,
    last_seen_host: Option<Ipv6Addr>,
) -> Ipv6Addr {
    if dest_port == 53 && destination == cfg.tap_dns_alias {
        return cfg.host_dns;
    }
    if destination == cfg.gateway || destination == cfg.link_local {
        return last_seen_host.unwrap_or(Ipv6Addr::LOCALHOST);
    }
    destination
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DnsGateway {
        DnsGateway {
            host_dns: Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x0a00, 0x0001),
            tap_dns_alias: Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc0a8, 0x0001),
            gateway: Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc0a8, 0x0002),
            link_local: Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
        }
    }

    #[test]
    fn inbound_dns_reply_is_rewritten_to_tap_alias() {
        let cfg = cfg();
        let out = remap_inbound_source(&cfg, cfg.host_dns, 53, None);
        assert_eq!(out, cfg.tap_dns_alias);
    }

    #[test]
    fn inbound_loopback_source_becomes_gateway() {
        let cfg = cfg();
        let out = remap_inbound_source(&cfg, Ipv6Addr::LOCALHOST, 8080, None);
        assert_eq!(out, cfg.gateway);
    }

    #[test]
    fn inbound_ordinary_source_passes_through() {
        let cfg = cfg();
        let other = Ipv6Addr::new(2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        assert_eq!(remap_inbound_source(&cfg, other, 8080, None), other);
    }

    #[test]
    fn outbound_tap_dns_alias_resolves_to_host_dns() {
        let cfg = cfg();
        let out = remap_outbound_destination(&cfg, cfg.tap_dns_alias, 53, None);
        assert_eq!(out, cfg.host_dns);
    }

    #[test]
    fn outbound_gateway_falls_back_to_last_seen_host() {
        let cfg = cfg();
        let last = Ipv6Addr::new(10, 0, 0, 0, 0, 0, 0, 5);
        let out = remap_outbound_destination(&cfg, cfg.gateway, 9999, Some(last));
        assert_eq!(out, last);
    }
}
