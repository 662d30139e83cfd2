// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Constants named throughout §4.3.

use std::time::Duration;

/// Upper bound on sequence-space deltas treated as "ahead" rather than a
/// wrapped-around regression; keeps wrap-safe arithmetic well inside
/// `i32`'s range.
pub const MAX_WINDOW: u32 = 1 << 24;

/// Above this `SO_SNDBUF`, the advertised window is halved.
pub const SNDBUF_BIG: u32 = 4 * 1024 * 1024;

/// Above this `SO_SNDBUF`, the advertised window is linearly pinched
/// between `SNDBUF_SMALL` and `SNDBUF_BIG`.
pub const SNDBUF_SMALL: u32 = 128 * 1024;

/// Interval for a pending `ACK_TO_TAP_DUE` timer.
pub const ACK_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout waiting for a SYN/ACK to complete the handshake.
pub const SYN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout waiting for an ACK once established.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout after our FIN has been sent and acknowledged, waiting for the
/// peer's own close to complete.
pub const FIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for an established connection with no events pending at all.
pub const ACTIVITY_TIMEOUT: Duration = Duration::from_secs(7200);

/// Retransmission attempts before giving up and resetting the connection.
pub const MAX_RETRANS: u8 = 7;

/// Default MSS advertised to the tap side absent better information.
pub const DEFAULT_MSS: u16 = 1460;

/// Number of pre-opened, unconnected sockets kept ready per address family
/// so a new outbound connection never pays `socket()` latency on the hot
/// path (§5 Shared resources).
pub const TCP_SOCK_POOL_SIZE: usize = 8;

/// `tcpi_min_rtt` at or below this is treated as "local" for the low-RTT
/// window-clamping bypass (§4.3 Low-RTT optimization).
pub const LOW_RTT_THRESHOLD: Duration = Duration::from_micros(10);

/// Size of the LRU remembering which far addresses hit the low-RTT path.
pub const LOW_RTT_LRU_SIZE: usize = 8;
