// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow table: fixed-capacity slot array with free-cluster allocation
//! (§4.1), grounded on the original `flow_alloc`/`flow_first_free` free-list
//! bookkeeping in `flow.c` and on the block/bitmap accounting style of the
//! teacher's `nat/src/stateful/apalloc/port_alloc.rs` (atomics and the
//! `Mutex` dropped: there is exactly one owner of this table, per §5).

use crate::entry::FlowSlot;
use std::fmt;

/// Index of a flow-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowIndex(u32);

impl FlowIndex {
    /// Build an index from a raw slot number.
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw slot number.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FlowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned by [`FlowTable::alloc`].
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Every slot is in use; `first_free == TABLE_MAX`.
    #[error("flow table is full")]
    TableFull,
}

/// The flow table (§3, §4.1).
///
/// Holds exactly `capacity` slots. Free slots form a strictly-ordered,
/// singly-linked list of clusters; only a cluster's head slot carries
/// `(n, next)` — interior slots of a free run are logically untouched.
pub struct FlowTable {
    slots: Vec<FlowSlot>,
    first_free: u32,
    capacity: u32,
}

impl FlowTable {
    /// Build an empty table of `capacity` slots, entirely free.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        if capacity > 0 {
            slots.push(FlowSlot::Free {
                n: capacity,
                next: capacity,
            });
            for _ in 1..capacity {
                // Interior slots of the single initial free cluster; never
                // read, but must exist so indices stay in bounds.
                slots.push(FlowSlot::Free { n: 0, next: 0 });
            }
        }
        Self {
            slots,
            first_free: 0,
            capacity,
        }
    }

    /// Table capacity, in slots.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Borrow a slot by index.
    #[must_use]
    pub fn get(&self, index: FlowIndex) -> &FlowSlot {
        &self.slots[index.get() as usize]
    }

    /// Mutably borrow a slot by index.
    #[must_use]
    pub fn get_mut(&mut self, index: FlowIndex) -> &mut FlowSlot {
        &mut self.slots[index.get() as usize]
    }

    /// Reserve the slot at `first_free`, shrinking or advancing past its
    /// cluster. The returned slot holds [`FlowSlot::Allocated`] until
    /// [`FlowTable::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::TableFull`] if `first_free == capacity`.
    pub fn alloc(&mut self) -> Result<FlowIndex, FlowError> {
        if self.first_free == self.capacity {
            return Err(FlowError::TableFull);
        }
        let head = self.first_free;
        let (n, next) = match self.slots[head as usize] {
            FlowSlot::Free { n, next } => (n, next),
            ref other => unreachable!("first_free does not point to a Free head: {other:?}"),
        };
        if n > 1 {
            self.slots[(head + 1) as usize] = FlowSlot::Free { n: n - 1, next };
            self.first_free = head + 1;
        } else {
            self.first_free = next;
        }
        self.slots[head as usize] = FlowSlot::Allocated;
        Ok(FlowIndex::new(head))
    }

    /// Revert the most recent [`FlowTable::alloc`] call.
    ///
    /// Callers must not cancel any allocation but the most recent one.
    pub fn alloc_cancel(&mut self, slot: FlowIndex) {
        debug_assert!(matches!(self.slots[slot.get() as usize], FlowSlot::Allocated));
        self.slots[slot.get() as usize] = FlowSlot::Free {
            n: 1,
            next: self.first_free,
        };
        self.first_free = slot.get();
    }

    /// Give a reserved slot its type, making it visible to
    /// [`FlowTable::defer_sweep`].
    pub fn start(&mut self, slot: FlowIndex, entry: FlowSlot) {
        debug_assert!(matches!(self.slots[slot.get() as usize], FlowSlot::Allocated));
        debug_assert!(!entry.is_free_head());
        self.slots[slot.get() as usize] = entry;
    }

    /// One pass over the whole table (§4.1).
    ///
    /// For each live entry, `is_closed` decides whether the flow should be
    /// torn down. When it returns `true`, the previous slot contents are
    /// handed back to the caller (so it can release any owned OS resources)
    /// and the slot is folded into the free-cluster list being rebuilt by
    /// this same pass.
    pub fn defer_sweep(
        &mut self,
        mut is_closed: impl FnMut(FlowIndex, &mut FlowSlot) -> bool,
    ) -> Vec<(FlowIndex, FlowSlot)> {
        let mut closed = Vec::new();
        let mut i = 0u32;
        // (start, len) of the free cluster currently being accumulated.
        let mut merge_head: Option<(u32, u32)> = None;
        let mut new_first_free = self.capacity;
        // Start of the most recently committed cluster, so its `next` can
        // be back-patched once we learn where the following cluster (if
        // any) begins.
        let mut prev_head: Option<u32> = None;

        while i < self.capacity {
            match self.slots[i as usize] {
                FlowSlot::Free { n, .. } => {
                    debug_assert!(n > 0);
                    merge_head = match merge_head {
                        Some((start, len)) if start + len == i => Some((start, len + n)),
                        Some((start, len)) => {
                            Self::commit_cluster(
                                &mut self.slots,
                                start,
                                len,
                                self.capacity,
                                &mut new_first_free,
                                &mut prev_head,
                            );
                            Some((i, n))
                        }
                        None => Some((i, n)),
                    };
                    i += n;
                }
                FlowSlot::Allocated => unreachable!(
                    "slot {i} is Allocated during defer_sweep; alloc()/start() must not straddle a sweep"
                ),
                _ => {
                    let idx = FlowIndex::new(i);
                    if is_closed(idx, &mut self.slots[i as usize]) {
                        let prior = std::mem::replace(&mut self.slots[i as usize], FlowSlot::Allocated);
                        closed.push((idx, prior));
                        merge_head = match merge_head {
                            Some((start, len)) if start + len == i => Some((start, len + 1)),
                            Some((start, len)) => {
                                Self::commit_cluster(
                                    &mut self.slots,
                                    start,
                                    len,
                                    self.capacity,
                                    &mut new_first_free,
                                    &mut prev_head,
                                );
                                Some((i, 1))
                            }
                            None => Some((i, 1)),
                        };
                    } else if let Some((start, len)) = merge_head.take() {
                        Self::commit_cluster(
                            &mut self.slots,
                            start,
                            len,
                            self.capacity,
                            &mut new_first_free,
                            &mut prev_head,
                        );
                    }
                    i += 1;
                }
            }
        }
        if let Some((start, len)) = merge_head {
            Self::commit_cluster(
                &mut self.slots,
                start,
                len,
                self.capacity,
                &mut new_first_free,
                &mut prev_head,
            );
        }
        self.first_free = new_first_free;
        closed
    }

    /// Write a `Free { n, next }` head at `start` with a provisional `next`
    /// (the table-end sentinel), linking it from the previous head's `next`
    /// field (or `new_first_free` if this is the first cluster found this
    /// sweep). The previous head's `next` is back-patched here precisely
    /// because, until now, it wasn't known whether another cluster would
    /// follow it — matching the tie-break in §4.1: a cluster closed
    /// adjacent to the next is merged on the *next* sweep, not mid-sweep.
    fn commit_cluster(
        slots: &mut [FlowSlot],
        start: u32,
        len: u32,
        table_end: u32,
        new_first_free: &mut u32,
        prev_head: &mut Option<u32>,
    ) {
        slots[start as usize] = FlowSlot::Free {
            n: len,
            next: table_end,
        };
        match prev_head {
            Some(prev) => {
                if let FlowSlot::Free { next: prev_next, .. } = &mut slots[*prev as usize] {
                    *prev_next = start;
                }
            }
            None => *new_first_free = start,
        }
        *prev_head = Some(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{IcmpRecord, TcpEvents, TcpFlags, TcpKey, TcpRecord};
    use std::net::Ipv6Addr;

    fn ping(id: u16) -> FlowSlot {
        FlowSlot::Ping4(IcmpRecord {
            sock: -1,
            id,
            last_seq: 0,
            last_activity_ts: 0,
        })
    }

    fn tcp(eport: u16) -> FlowSlot {
        FlowSlot::Tcp(TcpRecord {
            key: TcpKey {
                faddr: Ipv6Addr::LOCALHOST,
                eport,
                fport: 80,
            },
            sock: -1,
            timer: None,
            events: TcpEvents::empty(),
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
            mss: 1460,
            retrans: 0,
            last_activity_ts: 0,
        })
    }

    #[test]
    fn alloc_consumes_slots_in_order() {
        let mut table = FlowTable::new(4);
        let a = table.alloc().unwrap();
        let b = table.alloc().unwrap();
        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
    }

    #[test]
    fn table_full_after_capacity_allocations() {
        let mut table = FlowTable::new(2);
        table.alloc().unwrap();
        table.alloc().unwrap();
        assert!(matches!(table.alloc(), Err(FlowError::TableFull)));
    }

    #[test]
    fn alloc_cancel_reverts_most_recent_allocation() {
        let mut table = FlowTable::new(2);
        let a = table.alloc().unwrap();
        table.alloc_cancel(a);
        let b = table.alloc().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sweep_reclaims_closed_entries_and_reopens_capacity() {
        let mut table = FlowTable::new(3);
        let a = table.alloc().unwrap();
        table.start(a, ping(1));
        let b = table.alloc().unwrap();
        table.start(b, ping(2));

        let closed = table.defer_sweep(|idx, _slot| idx == a);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].0, a);

        // slot `a` is free again and allocatable.
        let reused = table.alloc().unwrap();
        assert_eq!(reused, a);
    }

    #[test]
    fn adjacent_closures_merge_into_one_cluster() {
        let mut table = FlowTable::new(4);
        let a = table.alloc().unwrap();
        table.start(a, tcp(1));
        let b = table.alloc().unwrap();
        table.start(b, tcp(2));
        let c = table.alloc().unwrap();
        table.start(c, tcp(3));

        // Close the middle two entries (adjacent), leaving c's neighbor free.
        let closed = table.defer_sweep(|idx, _| idx == b || idx == c);
        assert_eq!(closed.len(), 2);

        // A single alloc() after the merge should return the lower index
        // first (b), confirming the cluster was rebuilt in strict order.
        let reused = table.alloc().unwrap();
        assert_eq!(reused, b);
    }
}
