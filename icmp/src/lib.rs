// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The ICMP echo engine: a trivial instance of the flow pattern (no
//! handshake, no sequence tracking beyond id/seq echo), grounded on
//! `original_source`'s `icmp_flow.h` and the handshake-allocation shape of
//! the TCP engine.

pub mod remap;

pub use remap::{rewrite_reply_id_v4, rewrite_reply_id_v6};

use flow::IcmpRecord;
use std::os::fd::RawFd;
use std::time::Duration;

/// Flows idle longer than this are closed during the deferred sweep.
pub const ICMP_CONN_TIMEOUT: Duration = Duration::from_secs(60);

/// One id-keyed ICMP echo flow's engine-facing operations.
pub struct IcmpEngine;

impl IcmpEngine {
    /// A tap-side echo request arrived for an id with no existing flow:
    /// build the record that will own the new ping socket. The
    /// kernel-assigned identifier the socket actually uses is supplied by
    /// the caller (read back after `bind()` on a ping socket, which
    /// rewrites the ICMP id to the bound port).
    #[must_use]
    pub fn new_flow(sock: RawFd, tap_id: u16, seq: u16, now: Duration) -> IcmpRecord {
        IcmpRecord {
            sock,
            id: tap_id,
            last_seq: seq,
            last_activity_ts: now.as_millis() as u64,
        }
    }

    /// Refresh activity bookkeeping on a subsequent tap-side echo request
    /// for an existing flow.
    pub fn touch(record: &mut IcmpRecord, seq: u16, now: Duration) {
        record.last_seq = seq;
        record.last_activity_ts = now.as_millis() as u64;
    }

    /// True if `record` has been idle past [`ICMP_CONN_TIMEOUT`] as of
    /// `now`, i.e. the deferred sweep should close it.
    #[must_use]
    pub fn is_expired(record: &IcmpRecord, now: Duration) -> bool {
        let idle = now.as_millis() as u64 - record.last_activity_ts;
        Duration::from_millis(idle) >= ICMP_CONN_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_flow_records_id_and_seq() {
        let record = IcmpEngine::new_flow(-1, 0xabcd, 1, Duration::from_secs(5));
        assert_eq!(record.id, 0xabcd);
        assert_eq!(record.last_seq, 1);
    }

    #[test]
    fn touch_advances_activity_timestamp() {
        let mut record = IcmpEngine::new_flow(-1, 1, 1, Duration::from_secs(0));
        IcmpEngine::touch(&mut record, 2, Duration::from_secs(10));
        assert_eq!(record.last_seq, 2);
        assert_eq!(record.last_activity_ts, 10_000);
    }

    #[test]
    fn expires_after_timeout_elapses() {
        let record = IcmpEngine::new_flow(-1, 1, 1, Duration::from_secs(0));
        assert!(!IcmpEngine::is_expired(&record, Duration::from_secs(30)));
        assert!(IcmpEngine::is_expired(&record, Duration::from_secs(61)));
    }
}
