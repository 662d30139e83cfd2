// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The two tap transports (§6 Framed stream / Raw tap), grounded on the
//! teacher's `TUNSETIFF` ioctl idiom in
//! `interface-manager/src/interface/tap.rs`.

use crate::constants::MAX_MTU;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

nix::ioctl_write_ptr_bad!(tunsetiff, libc::TUNSETIFF, libc::ifreq);

/// Raw tap transport: a `/dev/net/tun` character device in `IFF_TAP` mode
/// (pasta-style, host-namespace tap).
pub struct RawTap {
    file: File,
}

impl RawTap {
    /// Open `/dev/net/tun` and bind it to an existing tap interface named
    /// `ifname` (already created and handed to this namespace).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the device can't be opened or the ioctl
    /// fails.
    pub fn open(ifname: &str) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/net/tun")?;
        let mut ifreq: libc::ifreq = unsafe { std::mem::zeroed() };
        for (dst, src) in ifreq.ifr_name.iter_mut().zip(ifname.as_bytes()) {
            *dst = *src as libc::c_char;
        }
        ifreq.ifr_ifru = libc::__c_anonymous_ifr_ifru {
            ifru_ifindex: libc::IFF_TAP | libc::IFF_NO_PI,
        };
        unsafe { tunsetiff(file.as_raw_fd(), &ifreq) }
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(Self { file })
    }

    /// Read one frame, capped at [`MAX_MTU`] (§4.5: "Raw transport: frames
    /// are back-to-back reads, each capped at `MAX_MTU`").
    pub fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(&mut buf[..MAX_MTU.min(buf.len())])
    }

    /// Write one already-built Ethernet frame.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)
    }
}

impl AsRawFd for RawTap {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Framed-stream tap transport (passt-style): a `UnixStream` carrying
/// `<u32 big-endian length><frame>` records, possibly batched in one read
/// (§6 Framed stream).
pub struct StreamTap {
    stream: UnixStream,
}

impl StreamTap {
    /// Wrap an already-accepted connection.
    #[must_use]
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Read one length-prefixed frame into `buf`, returning its length.
    ///
    /// If the length prefix or frame body straddles the end of what's
    /// currently available, this blocks to complete it (§4.5: "if the tail
    /// of a read is a partial frame, complete it with a blocking read" —
    /// the sole blocking-read exception to §5's nonblocking-everything
    /// rule, bounded by one frame).
    ///
    /// # Errors
    ///
    /// Returns an I/O error on a short read (peer closed mid-frame) or if
    /// the declared length exceeds [`MAX_MTU`].
    pub fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_MTU || len > buf.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }
        self.stream.read_exact(&mut buf[..len])?;
        Ok(len)
    }

    /// Write one frame with its length prefix.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(frame)
    }
}

impl AsRawFd for StreamTap {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Either tap transport, used where demultiplexing logic doesn't care
/// which one is in play.
pub enum Transport {
    /// `/dev/net/tun` in `IFF_TAP` mode.
    Raw(RawTap),
    /// A framed Unix-domain stream socket.
    Stream(StreamTap),
}

impl Transport {
    /// Read one frame via whichever transport this is.
    pub fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Raw(t) => t.read_frame(buf),
            Transport::Stream(t) => t.read_frame(buf),
        }
    }

    /// Write one frame via whichever transport this is.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match self {
            Transport::Raw(t) => t.write_frame(frame),
            Transport::Stream(t) => t.write_frame(frame),
        }
    }
}

impl AsRawFd for Transport {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Transport::Raw(t) => t.as_raw_fd(),
            Transport::Stream(t) => t.as_raw_fd(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn stream_tap_round_trips_a_frame() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut writer = StreamTap::new(a);
        let mut reader = StreamTap::new(b);
        writer.write_frame(&[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 64];
        let len = reader.read_frame(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3, 4]);
    }

    #[test]
    fn stream_tap_rejects_oversized_length_prefix() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut writer = a;
        writer.write_all(&((MAX_MTU as u32) + 1).to_be_bytes()).unwrap();
        let mut reader = StreamTap::new(b);
        let mut buf = [0u8; 64];
        assert!(reader.read_frame(&mut buf).is_err());
    }
}
