// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Window-size bookkeeping (§4.3 Window tracking, Low-RTT optimization).

use crate::constants::{LOW_RTT_LRU_SIZE, MAX_WINDOW, SNDBUF_BIG, SNDBUF_SMALL};
use std::net::Ipv6Addr;

/// Scale a raw `SO_SNDBUF` value into the window we are willing to
/// advertise: halved above [`SNDBUF_BIG`], linearly pinched between
/// [`SNDBUF_SMALL`] and [`SNDBUF_BIG`], passed through below that.
#[must_use]
pub fn sndbuf_effective(sndbuf: u32) -> u32 {
    if sndbuf > SNDBUF_BIG {
        sndbuf / 2
    } else if sndbuf > SNDBUF_SMALL {
        let span = SNDBUF_BIG - SNDBUF_SMALL;
        let over = sndbuf - SNDBUF_SMALL;
        // Linear interpolation from `sndbuf` (at the low end) down to
        // `sndbuf / 2` (at the high end).
        let pinch = over * sndbuf / 2 / span;
        sndbuf - pinch
    } else {
        sndbuf
    }
}

/// The window we advertise to the tap side: the kernel-reported send
/// window when available, otherwise the scaled `SO_SNDBUF`, always capped
/// at [`MAX_WINDOW`].
#[must_use]
pub fn advertised_window(tcpi_snd_wnd: Option<u32>, sndbuf: u32) -> u32 {
    let effective = sndbuf_effective(sndbuf);
    match tcpi_snd_wnd {
        Some(snd_wnd) => snd_wnd.min(effective),
        None => effective.min(MAX_WINDOW),
    }
}

/// LRU of far addresses recently observed with `tcpi_min_rtt` at or below
/// [`crate::constants::LOW_RTT_THRESHOLD`] (§4.3 Low-RTT optimization):
/// these peers skip window clamping and delayed ACKs.
#[derive(Debug, Default)]
pub struct LowRttLru {
    // Most-recently-used at the back.
    entries: Vec<Ipv6Addr>,
}

impl LowRttLru {
    /// An empty LRU.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(LOW_RTT_LRU_SIZE) }
    }

    /// Record that `addr` was observed with a qualifying low RTT.
    pub fn touch(&mut self, addr: Ipv6Addr) {
        self.entries.retain(|a| *a != addr);
        if self.entries.len() == LOW_RTT_LRU_SIZE {
            self.entries.remove(0);
        }
        self.entries.push(addr);
    }

    /// True if `addr` is currently remembered as low-RTT.
    #[must_use]
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        self.entries.contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sndbuf_passes_through_unscaled() {
        assert_eq!(sndbuf_effective(64 * 1024), 64 * 1024);
    }

    #[test]
    fn huge_sndbuf_is_halved() {
        assert_eq!(sndbuf_effective(8 * 1024 * 1024), 4 * 1024 * 1024);
    }

    #[test]
    fn mid_range_sndbuf_is_pinched_between_the_extremes() {
        let small = sndbuf_effective(SNDBUF_SMALL + 1);
        let big = sndbuf_effective(SNDBUF_BIG);
        assert!(small <= SNDBUF_SMALL + 1);
        assert!(big <= SNDBUF_BIG);
        assert!(big < SNDBUF_SMALL + 1 || big <= SNDBUF_BIG);
    }

    #[test]
    fn kernel_reported_window_is_preferred_when_present() {
        assert_eq!(advertised_window(Some(1000), 9_999_999), 1000);
    }

    #[test]
    fn lru_evicts_oldest_beyond_capacity() {
        let mut lru = LowRttLru::new();
        for i in 0..(LOW_RTT_LRU_SIZE as u16 + 1) {
            lru.touch(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, i));
        }
        assert!(!lru.contains(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0)));
        assert!(lru.contains(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, LOW_RTT_LRU_SIZE as u16)));
    }
}
