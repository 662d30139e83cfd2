// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4 header type.

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use etherparse::{IpNumber, Ipv4Header};
use std::net::Ipv4Addr;
use std::num::NonZero;

/// An IPv4 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4(Ipv4Header);

/// Transport protocol numbers this workspace cares about.
pub mod proto {
    /// ICMP.
    pub const ICMP: u8 = 1;
    /// TCP.
    pub const TCP: u8 = 6;
    /// UDP.
    pub const UDP: u8 = 17;
}

impl Ipv4 {
    /// Minimum IPv4 header length (no options).
    pub const MIN_LEN: usize = 20;

    /// Build a header for a packet carrying `payload_len` bytes of `protocol`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload_len` cannot fit in the 16-bit total
    /// length field once the header is accounted for.
    pub fn new(
        payload_len: u16,
        ttl: u8,
        protocol: u8,
        source: Ipv4Addr,
        destination: Ipv4Addr,
    ) -> Result<Self, Ipv4Error> {
        let inner = Ipv4Header::new(
            payload_len,
            ttl,
            IpNumber(protocol),
            source.octets(),
            destination.octets(),
        )
        .map_err(|_| Ipv4Error::PayloadTooLarge(payload_len))?;
        Ok(Self(inner))
    }

    /// Source address.
    #[must_use]
    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0.source)
    }

    /// Destination address.
    #[must_use]
    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0.destination)
    }

    /// Next-layer protocol number.
    #[must_use]
    pub fn protocol(&self) -> u8 {
        self.0.protocol.0
    }

    /// Header length in bytes, including options.
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.0.header_len()
    }

    /// `total_len` field: header + payload, in bytes.
    #[must_use]
    pub fn total_len(&self) -> u16 {
        self.0.total_len
    }

    /// Time-to-live.
    #[must_use]
    pub fn ttl(&self) -> u8 {
        self.0.time_to_live
    }

    /// The `identification` field, used to group fragments of one datagram.
    #[must_use]
    pub fn identification(&self) -> u16 {
        self.0.identification
    }

    /// True if the more-fragments bit is set.
    #[must_use]
    pub fn more_fragments(&self) -> bool {
        self.0.more_fragments
    }

    /// The 13-bit fragment offset, in units of 8 bytes.
    #[must_use]
    pub fn fragment_offset(&self) -> u16 {
        self.0.fragment_offset.value()
    }

    /// True if this packet is a fragment (non-zero offset or MF set), per
    /// §4.5: fragments are detected and silently dropped.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset() != 0
    }

    /// Header checksum as stored in the packet.
    #[must_use]
    pub fn checksum(&self) -> u16 {
        self.0.header_checksum
    }

    /// Set the destination address.
    pub fn set_destination(&mut self, destination: Ipv4Addr) -> &mut Self {
        self.0.destination = destination.octets();
        self
    }

    /// Set the source address.
    pub fn set_source(&mut self, source: Ipv4Addr) -> &mut Self {
        self.0.source = source.octets();
        self
    }

    /// Set the `identification` field.
    pub fn set_identification(&mut self, id: u16) -> &mut Self {
        self.0.identification = id;
        self
    }

    /// Set `total_len`.
    pub fn set_total_len(&mut self, len: u16) -> &mut Self {
        self.0.total_len = len;
        self
    }

    /// Recompute and store the header checksum.
    pub fn update_checksum(&mut self) {
        self.0.header_checksum = self.0.calc_header_checksum();
    }
}

/// Error building or validating an [`Ipv4`] header.
#[derive(Debug, thiserror::Error)]
pub enum Ipv4Error {
    /// The requested payload cannot fit in a 16-bit total length field.
    #[error("payload of {0} bytes does not fit in an IPv4 datagram")]
    PayloadTooLarge(u16),
    /// `etherparse` rejected the header.
    #[error(transparent)]
    Invalid(#[from] etherparse::err::ipv4::HeaderSliceError),
}

impl Parse for Ipv4 {
    type Error = Ipv4Error;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (inner, rest) =
            Ipv4Header::from_slice(buf).map_err(|e| ParseError::Invalid(Ipv4Error::from(e)))?;
        let consumed =
            NonZero::new(buf.len() - rest.len()).ok_or(ParseError::Length(LengthError {
                expected: NonZero::new(Self::MIN_LEN).unwrap_or_else(|| unreachable!()),
                actual: 0,
            }))?;
        Ok((Self(inner), consumed))
    }
}

impl DeParse for Ipv4 {
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

    #[test]
    fn fragment_detection_matches_either_field() {
        let mut ip = Ipv4::new(0, 64, proto::TCP, Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST)
            .expect("valid header");
        assert!(!ip.is_fragment());
        ip.0.more_fragments = true;
        assert!(ip.is_fragment());
    }

    #[test]
    fn round_trips_through_parse_and_deparse() {
        let mut ip = Ipv4::new(
            0,
            64,
            proto::UDP,
            Ipv4Addr::new(10, 0, 2, 15),
            Ipv4Addr::new(10, 0, 2, 3),
        )
        .unwrap();
        ip.update_checksum();
        let mut buf = [0u8; Ipv4::MIN_LEN];
        ip.deparse(&mut buf).unwrap();
        let (parsed, _) = Ipv4::parse(&buf).unwrap();
        assert_eq!(parsed.source(), ip.source());
        assert_eq!(parsed.destination(), ip.destination());
        assert_eq!(parsed.checksum(), ip.checksum());
    }
}
