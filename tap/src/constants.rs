// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Constants named in §4.5.

use std::time::Duration;

/// Largest Ethernet frame this shim will carry in either direction.
pub const MAX_MTU: usize = 65535;

/// Assumed page size for sizing the receive buffer.
pub const PAGE_SIZE: usize = 4096;

/// Single contiguous receive buffer size: `round_down((MAX_MTU + 4) * 128, PAGE_SIZE)`.
pub const TAP_BUF_BYTES: usize = ((MAX_MTU + 4) * 128 / PAGE_SIZE) * PAGE_SIZE;

/// Linux's `IOV_MAX`/`UIO_MAXIOV`: the largest iovec count a single
/// `writev`/`sendmsg` call accepts, bounding the second-pass grouping
/// loop's sub-pool size.
pub const UIO_MAXIOV: usize = 1024;

/// Minimum gap between rate-limited fragment-drop warnings.
pub const FRAGMENT_WARNING_INTERVAL: Duration = Duration::from_secs(10);
