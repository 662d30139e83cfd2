// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Batched, nonblocking UDP I/O (§4.4). Neither `nix` nor the teacher's
//! dependency set exposes `recvmmsg`/`sendmmsg`, so batching is a bounded
//! loop of `recvmsg`/`sendmsg` calls rather than the single-syscall
//! original — the coalescing *behavior* (many datagrams, one tap-side
//! write) is preserved; only the syscall count differs.

use nix::sys::socket::{self, AddressFamily, MsgFlags, SockFlag, SockType, SockaddrStorage};
use std::io;
use std::os::fd::{IntoRawFd, RawFd};

/// Upper bound on datagrams drained from one socket per dispatcher
/// iteration, standing in for a single `recvmmsg` call.
pub const UDP_MAX_FRAMES: usize = 32;

/// One received datagram: its payload length (already copied into the
/// caller-owned per-frame buffer) and the peer it came from.
#[derive(Debug)]
pub struct ReceivedDatagram {
    /// Bytes actually received.
    pub len: usize,
    /// Sender address, when the kernel reported one.
    pub from: Option<SockaddrStorage>,
}

/// Open a nonblocking UDP socket in `family`.
///
/// # Errors
///
/// Returns an I/O error if `socket(2)` fails.
pub fn open_nonblocking(family: AddressFamily) -> io::Result<RawFd> {
    let fd = socket::socket(family, SockType::Datagram, SockFlag::SOCK_NONBLOCK, None)
        .map_err(io::Error::from)?;
    Ok(fd.into_raw_fd())
}

/// Drain up to [`UDP_MAX_FRAMES`] datagrams from `sock` into `bufs`, one
/// buffer per datagram slot. Stops early on `EAGAIN`/`EWOULDBLOCK`.
///
/// # Errors
///
/// Returns an I/O error for any `recvmsg` failure other than the socket
/// having no more data ready.
pub fn recv_batch(sock: RawFd, bufs: &mut [Vec<u8>]) -> io::Result<Vec<ReceivedDatagram>> {
    let mut received = Vec::with_capacity(bufs.len().min(UDP_MAX_FRAMES));
    for buf in bufs.iter_mut().take(UDP_MAX_FRAMES) {
        match socket::recvfrom::<SockaddrStorage>(sock, buf) {
            Ok((len, from)) => received.push(ReceivedDatagram { len, from }),
            Err(nix::Error::EAGAIN) => break,
            Err(e) => return Err(io::Error::from(e)),
        }
    }
    Ok(received)
}

/// Send one datagram nonblocking, tolerating `EAGAIN` by reporting zero
/// bytes sent rather than erroring (caller decides whether to drop or
/// retry next iteration — §5's "no blocking on registered sockets" rule).
///
/// # Errors
///
/// Returns an I/O error for any `send` failure other than `EAGAIN`.
pub fn send_nonblocking(sock: RawFd, data: &[u8]) -> io::Result<usize> {
    match socket::send(sock, data, MsgFlags::MSG_DONTWAIT) {
        Ok(n) => Ok(n),
        Err(nix::Error::EAGAIN) => Ok(0),
        Err(e) => Err(io::Error::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_batch_caps_at_max_frames() {
        // UDP_MAX_FRAMES bounds the loop regardless of how many buffers
        // are handed in; this just documents the constant's purpose since
        // exercising real sockets needs a live fd.
        assert_eq!(UDP_MAX_FRAMES, 32);
    }
}
