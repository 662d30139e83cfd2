// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP header type.

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use etherparse::err::tcp::{HeaderError, HeaderSliceError};
use etherparse::TcpHeader;
use std::num::NonZero;

/// A TCP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tcp(TcpHeader);

impl Tcp {
    /// Minimum length of a TCP header (no options).
    pub const MIN_LEN: usize = 20;
    /// Maximum length of a TCP header (options filled to `0xf` words).
    pub const MAX_LEN: usize = 60;

    /// Build a bare header (no flags, no options) for `source -> destination`.
    #[must_use]
    pub fn new(source: u16, destination: u16, sequence_number: u32, window: u16) -> Self {
        Self(etherparse::TcpHeader::new(source, destination, sequence_number, window))
    }

    /// Set the window scale option, replacing any options already present.
    pub fn set_window_scale(&mut self, shift: u8) -> &mut Self {
        let _ = self.0.set_options(&[etherparse::TcpOptionElement::WindowScale(shift)]);
        self
    }

    /// Set the maximum segment size option, replacing any options already present.
    pub fn set_mss(&mut self, mss: u16) -> &mut Self {
        let _ = self.0.set_options(&[etherparse::TcpOptionElement::MaximumSegmentSize(mss)]);
        self
    }

    /// Source port.
    #[must_use]
    pub const fn source(&self) -> u16 {
        self.0.source_port
    }

    /// Set the source port.
    pub fn set_source(&mut self, port: u16) -> &mut Self {
        self.0.source_port = port;
        self
    }

    /// Destination port.
    #[must_use]
    pub const fn destination(&self) -> u16 {
        self.0.destination_port
    }

    /// Set the destination port.
    pub fn set_destination(&mut self, port: u16) -> &mut Self {
        self.0.destination_port = port;
        self
    }

    /// Header length, in bytes, including options.
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.0.header_len()
    }

    /// Header checksum.
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.0.checksum
    }

    /// Set the checksum.
    pub fn set_checksum(&mut self, checksum: u16) -> &mut Self {
        self.0.checksum = checksum;
        self
    }

    /// Sequence number.
    #[must_use]
    pub const fn sequence_number(&self) -> u32 {
        self.0.sequence_number
    }

    /// Set the sequence number.
    pub fn set_sequence_number(&mut self, seq: u32) -> &mut Self {
        self.0.sequence_number = seq;
        self
    }

    /// Acknowledgment number.
    #[must_use]
    pub const fn ack_number(&self) -> u32 {
        self.0.acknowledgment_number
    }

    /// Set the acknowledgment number.
    pub fn set_ack_number(&mut self, ack: u32) -> &mut Self {
        self.0.acknowledgment_number = ack;
        self
    }

    /// `SYN` flag.
    #[must_use]
    pub const fn syn(&self) -> bool {
        self.0.syn
    }

    /// Set the `SYN` flag.
    pub fn set_syn(&mut self, syn: bool) -> &mut Self {
        self.0.syn = syn;
        self
    }

    /// `ACK` flag.
    #[must_use]
    pub const fn ack(&self) -> bool {
        self.0.ack
    }

    /// Set the `ACK` flag.
    pub fn set_ack(&mut self, ack: bool) -> &mut Self {
        self.0.ack = ack;
        self
    }

    /// `FIN` flag.
    #[must_use]
    pub const fn fin(&self) -> bool {
        self.0.fin
    }

    /// Set the `FIN` flag.
    pub fn set_fin(&mut self, fin: bool) -> &mut Self {
        self.0.fin = fin;
        self
    }

    /// `RST` flag.
    #[must_use]
    pub const fn rst(&self) -> bool {
        self.0.rst
    }

    /// Set the `RST` flag.
    pub fn set_rst(&mut self, rst: bool) -> &mut Self {
        self.0.rst = rst;
        self
    }

    /// `PSH` flag.
    #[must_use]
    pub const fn psh(&self) -> bool {
        self.0.psh
    }

    /// Set the `PSH` flag.
    pub fn set_psh(&mut self, psh: bool) -> &mut Self {
        self.0.psh = psh;
        self
    }

    /// Advertised window size, as transmitted on the wire (pre-scaling).
    #[must_use]
    pub const fn window_size(&self) -> u16 {
        self.0.window_size
    }

    /// Set the advertised window size.
    pub fn set_window_size(&mut self, window_size: u16) -> &mut Self {
        self.0.window_size = window_size;
        self
    }

    /// Raw options bytes, if any are present.
    #[must_use]
    pub fn options(&self) -> Option<&[u8]> {
        if self.0.options.is_empty() {
            None
        } else {
            Some(self.0.options.as_slice())
        }
    }

    /// Window scale option, if present (§4.3: negotiated during the handshake).
    #[must_use]
    pub fn window_scale(&self) -> Option<u8> {
        self.0.options_iterator().find_map(|opt| match opt {
            Ok(etherparse::TcpOptionElement::WindowScale(shift)) => Some(shift),
            _ => None,
        })
    }

    /// Maximum segment size option, if present.
    #[must_use]
    pub fn mss(&self) -> Option<u16> {
        self.0.options_iterator().find_map(|opt| match opt {
            Ok(etherparse::TcpOptionElement::MaximumSegmentSize(mss)) => Some(mss),
            _ => None,
        })
    }

    /// Selective-ACK-permitted option present.
    #[must_use]
    pub fn sack_permitted(&self) -> bool {
        self.0
            .options_iterator()
            .any(|opt| matches!(opt, Ok(etherparse::TcpOptionElement::SelectiveAckPermitted)))
    }
}

/// Error parsing a [`Tcp`] header.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    /// Zero is not a legal source port.
    #[error("zero source port")]
    ZeroSourcePort,
    /// Zero is not a legal destination port.
    #[error("zero destination port")]
    ZeroDestPort,
    /// The data offset is smaller than the fixed header itself.
    #[error("data offset too small: {0}")]
    DataOffsetTooSmall(u8),
}

impl Parse for Tcp {
    type Error = TcpError;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (inner, rest) = TcpHeader::from_slice(buf).map_err(|e| match e {
            HeaderSliceError::Len(len) => ParseError::Length(LengthError {
                expected: NonZero::new(len.required_len).unwrap_or_else(|| unreachable!()),
                actual: buf.len(),
            }),
            HeaderSliceError::Content(HeaderError::DataOffsetTooSmall { data_offset }) => {
                ParseError::Invalid(TcpError::DataOffsetTooSmall(data_offset))
            }
        })?;
        let consumed =
            NonZero::new(buf.len() - rest.len()).ok_or(ParseError::Length(LengthError {
                expected: NonZero::new(Self::MIN_LEN).unwrap_or_else(|| unreachable!()),
                actual: 0,
            }))?;
        if inner.source_port == 0 {
            return Err(ParseError::Invalid(TcpError::ZeroSourcePort));
        }
        if inner.destination_port == 0 {
            return Err(ParseError::Invalid(TcpError::ZeroDestPort));
        }
        Ok((Self(inner), consumed))
    }
}

impl DeParse for Tcp {
    type Error = ();

    fn size(&self) -> NonZero<usize> {
        NonZero::new(self.0.header_len()).unwrap_or_else(|| unreachable!())
    }

    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>> {
        let len = buf.len();
        if len < self.size().get() {
            return Err(DeParseError::Length(LengthError {
                expected: self.size(),
                actual: len,
            }));
        }
        let unused = self
            .0
            .write_to_slice(buf)
            .map_err(|_| DeParseError::Invalid(()))?;
        Ok(NonZero::new(len - unused.len()).unwrap_or_else(|| unreachable!()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tcp {
        let mut tcp = Tcp(TcpHeader::new(1234, 80, 0, 65535));
        tcp.set_syn(true);
        tcp
    }

    #[test]
    fn round_trips_through_parse_and_deparse() {
        let tcp = sample();
        let mut buf = [0u8; Tcp::MIN_LEN];
        tcp.deparse(&mut buf).unwrap();
        let (parsed, consumed) = Tcp::parse(&buf).unwrap();
        assert_eq!(consumed.get(), Tcp::MIN_LEN);
        assert_eq!(parsed, tcp);
    }

    #[test]
    fn zero_source_port_is_rejected() {
        let mut buf = [0u8; Tcp::MIN_LEN];
        let mut tcp = sample();
        tcp.set_source(0);
        tcp.deparse(&mut buf).unwrap();
        assert!(matches!(
            Tcp::parse(&buf),
            Err(ParseError::Invalid(TcpError::ZeroSourcePort))
        ));
    }
}
