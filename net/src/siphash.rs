// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A small, dependency-free SipHash-1-3 used for the TCP hash index bucket
//! (§4.2) and for initial sequence numbers (§4.3.5, RFC 6528).
//!
//! The teacher workspace reaches for `ahash`/`hashbrown` for its hash maps,
//! but neither of those exposes a keyed, reduced-round SipHash suitable for
//! an RFC 6528 ISN generator; this is a direct, from-spec implementation
//! rather than a generic hasher so the reduced round counts (1
//! compression round, 3 finalization rounds) are explicit.

/// A 128-bit secret, generated once per process and held for the lifetime
/// of the flow table and hash index.
#[derive(Debug, Clone, Copy)]
pub struct SipHashSecret {
    k0: u64,
    k1: u64,
}

impl SipHashSecret {
    /// Build a secret from two 64-bit halves (e.g. from `getrandom`).
    #[must_use]
    pub fn from_parts(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }

    /// Hash `data` under this secret.
    #[must_use]
    pub fn hash(&self, data: &[u8]) -> u64 {
        siphash13(self.k0, self.k1, data)
    }
}

macro_rules! sipround {
    ($v0:expr, $v1:expr, $v2:expr, $v3:expr) => {{
        $v0 = $v0.wrapping_add($v1);
        $v1 = $v1.rotate_left(13);
        $v1 ^= $v0;
        $v0 = $v0.rotate_left(32);
        $v2 = $v2.wrapping_add($v3);
        $v3 = $v3.rotate_left(16);
        $v3 ^= $v2;
        $v0 = $v0.wrapping_add($v3);
        $v3 = $v3.rotate_left(21);
        $v3 ^= $v0;
        $v2 = $v2.wrapping_add($v1);
        $v1 = $v1.rotate_left(17);
        $v1 ^= $v2;
        $v2 = $v2.rotate_left(32);
    }};
}

fn siphash13(k0: u64, k1: u64, data: &[u8]) -> u64 {
    let mut v0 = 0x736f_6d65_7073_6575u64 ^ k0;
    let mut v1 = 0x646f_7261_6e64_6f6du64 ^ k1;
    let mut v2 = 0x6c79_6765_6e65_7261u64 ^ k0;
    let mut v3 = 0x7465_6462_7974_6573u64 ^ k1;

    let len = data.len();
    let chunks = data.chunks_exact(8);
    let tail = chunks.remainder();

    for chunk in chunks {
        let m = u64::from_le_bytes(chunk.try_into().unwrap_or_else(|_| unreachable!()));
        v3 ^= m;
        sipround!(v0, v1, v2, v3);
        v0 ^= m;
    }

    let mut last = [0u8; 8];
    last[..tail.len()].copy_from_slice(tail);
    last[7] = (len & 0xff) as u8;
    let m = u64::from_le_bytes(last);
    v3 ^= m;
    sipround!(v0, v1, v2, v3);
    v0 ^= m;

    v2 ^= 0xff;
    sipround!(v0, v1, v2, v3);
    sipround!(v0, v1, v2, v3);
    sipround!(v0, v1, v2, v3);

    v0 ^ v1 ^ v2 ^ v3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_secret_is_deterministic() {
        let secret = SipHashSecret::from_parts(1, 2);
        assert_eq!(secret.hash(b"hello"), secret.hash(b"hello"));
    }

    #[test]
    fn different_secret_changes_output() {
        let a = SipHashSecret::from_parts(1, 2);
        let b = SipHashSecret::from_parts(3, 4);
        assert_ne!(a.hash(b"hello"), b.hash(b"hello"));
    }

    #[test]
    fn empty_input_does_not_panic() {
        let secret = SipHashSecret::from_parts(0, 0);
        let _ = secret.hash(&[]);
    }
}
