// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The TCP hash index (§4.2): open-addressed, keyed by `(faddr, eport,
//! fport)`, linear probing backward from the hashed bucket, no tombstones —
//! deletion uses backward-shift.

use crate::entry::TcpKey;
use crate::table::FlowIndex;
use net::siphash::SipHashSecret;

/// Error returned by [`TcpHashIndex`] operations.
#[derive(Debug, thiserror::Error)]
pub enum TcpHashError {
    /// No empty slot was found while probing; the index is full or
    /// miscalibrated relative to the flow table (§4.2: "Size N ≥ flow table
    /// capacity so probing always terminates at an empty slot").
    #[error("hash index has no empty slot for insertion")]
    Full,
    /// `lookup`/`remove` found no entry for the given key.
    #[error("key not present in hash index")]
    NotFound,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Empty,
    Occupied { key: TcpKey, flow: FlowIndex },
}

/// An open-addressed hash index mapping [`TcpKey`] to [`FlowIndex`].
pub struct TcpHashIndex {
    buckets: Vec<Bucket>,
    secret: SipHashSecret,
}

impl TcpHashIndex {
    /// Build an index of `size` buckets (§4.2: size N ≥ flow table
    /// capacity).
    #[must_use]
    pub fn new(size: usize, secret: SipHashSecret) -> Self {
        Self {
            buckets: vec![Bucket::Empty; size],
            secret,
        }
    }

    fn natural_bucket(&self, key: TcpKey) -> usize {
        let h = self.secret.hash(&key.to_bytes());
        (h % self.buckets.len() as u64) as usize
    }

    /// Step one slot backward (decreasing index, wrapping at zero).
    fn prev(&self, index: usize) -> usize {
        if index == 0 {
            self.buckets.len() - 1
        } else {
            index - 1
        }
    }

    /// Insert `key -> flow`, probing backward from the hashed bucket until
    /// an empty slot is found.
    ///
    /// # Errors
    ///
    /// Returns [`TcpHashError::Full`] if every bucket is occupied.
    pub fn insert(&mut self, key: TcpKey, flow: FlowIndex) -> Result<(), TcpHashError> {
        let start = self.natural_bucket(key);
        let mut i = start;
        loop {
            match self.buckets[i] {
                Bucket::Empty => {
                    self.buckets[i] = Bucket::Occupied { key, flow };
                    return Ok(());
                }
                Bucket::Occupied { .. } => {
                    i = self.prev(i);
                    if i == start {
                        return Err(TcpHashError::Full);
                    }
                }
            }
        }
    }

    /// Look up the flow index for `key`.
    #[must_use]
    pub fn lookup(&self, key: TcpKey) -> Option<FlowIndex> {
        let start = self.natural_bucket(key);
        let mut i = start;
        loop {
            match self.buckets[i] {
                Bucket::Empty => return None,
                Bucket::Occupied { key: k, flow } if k == key => return Some(flow),
                Bucket::Occupied { .. } => {
                    i = self.prev(i);
                    if i == start {
                        return None;
                    }
                }
            }
        }
    }

    /// Remove `key`, backward-shifting any entries that were only reachable
    /// through the vacated slot.
    ///
    /// # Errors
    ///
    /// Returns [`TcpHashError::NotFound`] if `key` is not present.
    pub fn remove(&mut self, key: TcpKey) -> Result<(), TcpHashError> {
        let start = self.natural_bucket(key);
        let mut i = start;
        let removed = loop {
            match self.buckets[i] {
                Bucket::Empty => return Err(TcpHashError::NotFound),
                Bucket::Occupied { key: k, .. } if k == key => break i,
                Bucket::Occupied { .. } => {
                    i = self.prev(i);
                    if i == start {
                        return Err(TcpHashError::NotFound);
                    }
                }
            }
        };
        self.buckets[removed] = Bucket::Empty;

        // Continue in the same direction probing already moves in
        // (decreasing index): any occupied slot whose natural bucket's
        // probe chain passes through the current hole before reaching that
        // slot is only reachable through the hole, so it must shift into
        // it. Walk until an empty slot ends the chain.
        let mut hole = removed;
        let mut i = self.prev(removed);
        while let Bucket::Occupied { key: k, flow } = self.buckets[i] {
            let natural = self.natural_bucket(k);
            if Self::probe_passes_through(natural, hole, i, self.buckets.len()) {
                self.buckets[hole] = Bucket::Occupied { key: k, flow };
                self.buckets[i] = Bucket::Empty;
                hole = i;
            }
            i = self.prev(i);
            if i == removed {
                break;
            }
        }
        Ok(())
    }

    /// True if probing backward from `natural` reaches `hole` at or before
    /// it reaches `current`, i.e. `current`'s occupant is only reachable by
    /// probing through `hole`.
    fn probe_passes_through(natural: usize, hole: usize, current: usize, len: usize) -> bool {
        // Steps walked backward (decreasing, wrapping) from `natural`.
        let steps = |to: usize| -> usize { (natural + len - to) % len };
        steps(hole) <= steps(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn key(port: u16) -> TcpKey {
        TcpKey {
            faddr: Ipv6Addr::LOCALHOST,
            eport: port,
            fport: 80,
        }
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut idx = TcpHashIndex::new(16, SipHashSecret::from_parts(1, 2));
        idx.insert(key(1000), FlowIndex::new(5)).unwrap();
        assert_eq!(idx.lookup(key(1000)), Some(FlowIndex::new(5)));
    }

    #[test]
    fn lookup_of_absent_key_is_none() {
        let idx = TcpHashIndex::new(16, SipHashSecret::from_parts(1, 2));
        assert_eq!(idx.lookup(key(1)), None);
    }

    #[test]
    fn remove_makes_key_unfindable() {
        let mut idx = TcpHashIndex::new(16, SipHashSecret::from_parts(1, 2));
        idx.insert(key(1000), FlowIndex::new(5)).unwrap();
        idx.remove(key(1000)).unwrap();
        assert_eq!(idx.lookup(key(1000)), None);
    }

    #[test]
    fn remove_preserves_lookup_for_probed_collisions() {
        // Force three keys into the same natural bucket by using a tiny
        // table; insertion probes backward on collision.
        let mut idx = TcpHashIndex::new(4, SipHashSecret::from_parts(0, 0));
        let keys: Vec<TcpKey> = (0..4).map(key).collect();
        for (i, k) in keys.iter().enumerate() {
            idx.insert(*k, FlowIndex::new(i as u32)).unwrap();
        }
        // Remove one and make sure every surviving key is still reachable.
        let removed = keys[1];
        idx.remove(removed).unwrap();
        for (i, k) in keys.iter().enumerate() {
            if *k == removed {
                assert_eq!(idx.lookup(*k), None);
            } else {
                assert_eq!(idx.lookup(*k), Some(FlowIndex::new(i as u32)));
            }
        }
    }

    #[test]
    fn remove_of_absent_key_errors() {
        let mut idx = TcpHashIndex::new(16, SipHashSecret::from_parts(1, 2));
        assert!(matches!(
            idx.remove(key(1)),
            Err(TcpHashError::NotFound)
        ));
    }
}
