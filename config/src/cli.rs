// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command-line option table (§6), grounded on the teacher's
//! `#[derive(Parser)]` idiom in `netshim-bin/src/args.rs`.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "netshim")]
#[command(version = "0.0.1")]
#[command(about = "Userspace L2<->L4 network connectivity shim", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct CmdArgs {
    /// MTU advertised to the client; default is derived from `MAX_MTU`.
    #[arg(long, value_name = "N")]
    pub mtu: Option<u16>,

    /// Static tap-side address instead of probing.
    #[arg(long, value_name = "ADDR")]
    pub address: Option<String>,

    /// Gateway address used for "map-gw" rewrites.
    #[arg(long, value_name = "ADDR")]
    pub gateway: Option<String>,

    /// DNS address(es) advertised to the client.
    #[arg(long = "dns", value_name = "ADDR")]
    pub dns: Vec<String>,

    /// Tap-facing DNS alias address; presence triggers DNS rewrite.
    #[arg(long, value_name = "ADDR")]
    pub dns_forward: Option<String>,

    /// Disable the gateway -> loopback rewrite.
    #[arg(long, default_value_t = false)]
    pub no_map_gw: bool,

    /// Disable the TCP engine.
    #[arg(long, default_value_t = false)]
    pub no_tcp: bool,

    /// Disable the UDP engine.
    #[arg(long, default_value_t = false)]
    pub no_udp: bool,

    /// Disable the ICMP engine.
    #[arg(long, default_value_t = false)]
    pub no_icmp: bool,

    /// TCP port-forward spec, tap-to-host direction.
    #[arg(short = 't', value_name = "SPEC")]
    pub tcp_forward: Vec<String>,

    /// UDP port-forward spec, tap-to-host direction.
    #[arg(short = 'u', value_name = "SPEC")]
    pub udp_forward: Vec<String>,

    /// TCP port-forward spec, host-to-tap direction.
    #[arg(short = 'T', value_name = "SPEC")]
    pub tcp_forward_reverse: Vec<String>,

    /// UDP port-forward spec, host-to-tap direction.
    #[arg(short = 'U', value_name = "SPEC")]
    pub udp_forward_reverse: Vec<String>,

    /// Restrict to IPv4.
    #[arg(short = '4', default_value_t = false)]
    pub ipv4_flag: bool,

    /// Restrict to IPv6.
    #[arg(short = '6', default_value_t = false)]
    pub ipv6_flag: bool,

    /// Restrict to IPv4, long form.
    #[arg(long, default_value_t = false)]
    pub ipv4_only: bool,

    /// Restrict to IPv6, long form.
    #[arg(long, default_value_t = false)]
    pub ipv6_only: bool,

    /// Path of the framed-stream Unix socket (omit for raw tap mode).
    #[arg(long, value_name = "PATH")]
    pub socket_path: Option<String>,

    /// Exit after the first client disconnects.
    #[arg(long, default_value_t = false)]
    pub one_off: bool,
}
