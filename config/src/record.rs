// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The frozen configuration record (§9 "Shared process-wide state"):
//! built once from [`CmdArgs`] and handed by value to every core entry
//! point afterward. Nothing in `tcp`/`udp`/`icmp`/`tap` mutates it.

use crate::cli::CmdArgs;
use crate::portspec::{parse as parse_portspec, PortForward, PortSpecError};
use net::eth::Eth;
use std::net::IpAddr;
use std::path::PathBuf;
use tap::MAX_MTU;
use thiserror::Error;

/// Which engines are enabled, per `--no-tcp`/`--no-udp`/`--no-icmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSet {
    pub tcp: bool,
    pub udp: bool,
    pub icmp: bool,
}

/// Address family restriction from `-4`/`-6`/`--ipv4-only`/`--ipv6-only`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    #[default]
    Both,
    V4Only,
    V6Only,
}

/// A fatal configuration-phase error; the process exits non-zero on any
/// of these (§6 Exit codes).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("both -4/--ipv4-only and -6/--ipv6-only were given")]
    ConflictingFamily,
    #[error("invalid address {value:?} for --{option}")]
    InvalidAddress { option: &'static str, value: String },
    #[error("invalid port-forward spec for -{flag}")]
    PortSpec { flag: char, source: PortSpecError },
}

/// The core's complete, immutable view of how it was configured.
#[derive(Debug, Clone)]
pub struct Config {
    pub mtu: u16,
    pub address: Option<IpAddr>,
    pub gateway: Option<IpAddr>,
    pub dns: Vec<IpAddr>,
    pub dns_forward: Option<IpAddr>,
    pub map_gw: bool,
    pub engines: EngineSet,
    pub family: IpFamily,
    pub tcp_forward: PortForward,
    pub udp_forward: PortForward,
    pub tcp_forward_reverse: PortForward,
    pub udp_forward_reverse: PortForward,
    pub socket_path: Option<PathBuf>,
    pub one_off: bool,
}

/// MTU advertised to the client absent `--mtu`: `round_down(MAX_MTU - EthHdr, 4)`.
#[must_use]
pub fn default_mtu() -> u16 {
    let raw = MAX_MTU - Eth::HEADER_LEN;
    u16::try_from(raw - raw % 4).unwrap_or(u16::MAX)
}

impl Config {
    /// Build the frozen record from parsed CLI args.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an address fails to parse, a family
    /// restriction is contradictory, or a port-forward spec is malformed.
    pub fn from_args(args: &CmdArgs) -> Result<Self, ConfigError> {
        let family = match (args.ipv4_flag || args.ipv4_only, args.ipv6_flag || args.ipv6_only) {
            (true, true) => return Err(ConfigError::ConflictingFamily),
            (true, false) => IpFamily::V4Only,
            (false, true) => IpFamily::V6Only,
            (false, false) => IpFamily::Both,
        };

        let address = parse_opt_addr("address", args.address.as_deref())?;
        let gateway = parse_opt_addr("gateway", args.gateway.as_deref())?;
        let dns_forward = parse_opt_addr("dns-forward", args.dns_forward.as_deref())?;
        let dns = args
            .dns
            .iter()
            .map(|s| parse_addr("dns", s))
            .collect::<Result<Vec<_>, _>>()?;

        let tcp_forward = parse_joined('t', &args.tcp_forward)?;
        let udp_forward = parse_joined('u', &args.udp_forward)?;
        let tcp_forward_reverse = parse_joined('T', &args.tcp_forward_reverse)?;
        let udp_forward_reverse = parse_joined('U', &args.udp_forward_reverse)?;

        Ok(Self {
            mtu: args.mtu.unwrap_or_else(default_mtu),
            address,
            gateway,
            dns,
            dns_forward,
            map_gw: !args.no_map_gw,
            engines: EngineSet { tcp: !args.no_tcp, udp: !args.no_udp, icmp: !args.no_icmp },
            family,
            tcp_forward,
            udp_forward,
            tcp_forward_reverse,
            udp_forward_reverse,
            socket_path: args.socket_path.as_deref().map(PathBuf::from),
            one_off: args.one_off,
        })
    }
}

fn parse_addr(option: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidAddress { option, value: value.to_string() })
}

fn parse_opt_addr(option: &'static str, value: Option<&str>) -> Result<Option<IpAddr>, ConfigError> {
    value.map(|v| parse_addr(option, v)).transpose()
}

/// Multiple `-t`/`-u`/`-T`/`-U` occurrences are concatenated with commas
/// and parsed as one spec, matching the grammar's own comma-separated
/// item list.
fn parse_joined(flag: char, occurrences: &[String]) -> Result<PortForward, ConfigError> {
    if occurrences.is_empty() {
        return Ok(PortForward::None);
    }
    let joined = occurrences.join(",");
    parse_portspec(&joined).map_err(|source| ConfigError::PortSpec { flag, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CmdArgs {
        CmdArgs {
            mtu: None,
            address: None,
            gateway: None,
            dns: Vec::new(),
            dns_forward: None,
            no_map_gw: false,
            no_tcp: false,
            no_udp: false,
            no_icmp: false,
            tcp_forward: Vec::new(),
            udp_forward: Vec::new(),
            tcp_forward_reverse: Vec::new(),
            udp_forward_reverse: Vec::new(),
            ipv4_flag: false,
            ipv6_flag: false,
            ipv4_only: false,
            ipv6_only: false,
            socket_path: None,
            one_off: false,
        }
    }

    #[test]
    fn defaults_enable_all_engines_and_both_families() {
        let cfg = Config::from_args(&base_args()).unwrap();
        assert_eq!(cfg.engines, EngineSet { tcp: true, udp: true, icmp: true });
        assert_eq!(cfg.family, IpFamily::Both);
        assert!(cfg.map_gw);
        assert_eq!(cfg.mtu, default_mtu());
    }

    #[test]
    fn conflicting_family_flags_are_rejected() {
        let mut args = base_args();
        args.ipv4_flag = true;
        args.ipv6_flag = true;
        assert!(matches!(Config::from_args(&args), Err(ConfigError::ConflictingFamily)));
    }

    #[test]
    fn invalid_gateway_address_is_rejected() {
        let mut args = base_args();
        args.gateway = Some("not-an-ip".to_string());
        assert!(matches!(Config::from_args(&args), Err(ConfigError::InvalidAddress { option: "gateway", .. })));
    }

    #[test]
    fn multiple_forward_occurrences_are_joined() {
        let mut args = base_args();
        args.tcp_forward = vec!["80".to_string(), "443".to_string()];
        let cfg = Config::from_args(&args).unwrap();
        let PortForward::Items(items) = cfg.tcp_forward else { panic!() };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn no_map_gw_flips_map_gw_off() {
        let mut args = base_args();
        args.no_map_gw = true;
        let cfg = Config::from_args(&args).unwrap();
        assert!(!cfg.map_gw);
    }
}
