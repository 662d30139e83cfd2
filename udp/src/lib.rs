// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The UDP pseudo-connection tracker (§4.4): no state machine, just
//! per-port, per-family tables keyed by tap-side source port, aged out by
//! a periodic sweep.

pub mod engine;
pub mod remap;
pub mod table;

pub use engine::{open_nonblocking, recv_batch, send_nonblocking, ReceivedDatagram, UDP_MAX_FRAMES};
pub use remap::{remap_inbound_source, remap_outbound_destination, DnsGateway};
pub use table::{UdpFamilyTables, UdpFlags, UdpPortEntry, UdpTable, UDP_CONN_TIMEOUT};
