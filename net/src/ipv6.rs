// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv6 header type.

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use etherparse::{IpNumber, Ipv6Header};
use std::net::Ipv6Addr;
use std::num::NonZero;

/// An IPv6 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6(Ipv6Header);

impl Ipv6 {
    /// Length in bytes of a fixed IPv6 header (no extension headers).
    pub const HEADER_LEN: usize = 40;

    /// Build a new header.
    #[must_use]
    pub fn new(
        payload_len: u16,
        next_header: u8,
        hop_limit: u8,
        source: Ipv6Addr,
        destination: Ipv6Addr,
    ) -> Self {
        Self(Ipv6Header {
            traffic_class: 0,
            flow_label: Default::default(),
            payload_length: payload_len,
            next_header: IpNumber(next_header),
            hop_limit,
            source: source.octets(),
            destination: destination.octets(),
        })
    }

    /// Source address.
    #[must_use]
    pub fn source(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.0.source)
    }

    /// Destination address.
    #[must_use]
    pub fn destination(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.0.destination)
    }

    /// Next-header protocol number.
    #[must_use]
    pub fn next_header(&self) -> u8 {
        self.0.next_header.0
    }

    /// Hop limit (IPv6's analogue of IPv4's TTL).
    #[must_use]
    pub fn hop_limit(&self) -> u8 {
        self.0.hop_limit
    }

    /// Payload length, excluding this fixed header.
    #[must_use]
    pub fn payload_length(&self) -> u16 {
        self.0.payload_length
    }

    /// Overwrite the destination address.
    pub fn set_destination(&mut self, destination: Ipv6Addr) -> &mut Self {
        self.0.destination = destination.octets();
        self
    }

    /// Overwrite the source address.
    pub fn set_source(&mut self, source: Ipv6Addr) -> &mut Self {
        self.0.source = source.octets();
        self
    }

    /// Overwrite the payload length.
    pub fn set_payload_length(&mut self, length: u16) -> &mut Self {
        self.0.payload_length = length;
        self
    }

    /// Decrement the hop limit by one.
    ///
    /// # Errors
    ///
    /// Returns [`HopLimitExpired`] if the hop limit is already zero.
    pub fn decrement_hop_limit(&mut self) -> Result<(), HopLimitExpired> {
        if self.0.hop_limit == 0 {
            return Err(HopLimitExpired);
        }
        self.0.hop_limit -= 1;
        Ok(())
    }
}

/// The hop limit was already zero and cannot be decremented further.
#[derive(Debug, thiserror::Error)]
#[error("hop limit already zero")]
pub struct HopLimitExpired;

/// Error parsing or validating an [`Ipv6`] header.
#[derive(Debug, thiserror::Error)]
pub enum Ipv6Error {
    /// `etherparse` rejected the header.
    #[error(transparent)]
    Invalid(#[from] etherparse::err::ipv6::HeaderSliceError),
}

impl Parse for Ipv6 {
    type Error = Ipv6Error;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (inner, rest) =
            Ipv6Header::from_slice(buf).map_err(|e| ParseError::Invalid(Ipv6Error::from(e)))?;
        let consumed =
            NonZero::new(buf.len() - rest.len()).ok_or(ParseError::Length(LengthError {
                expected: NonZero::new(Self::HEADER_LEN).unwrap_or_else(|| unreachable!()),
                actual: 0,
            }))?;
        Ok((Self(inner), consumed))
    }
}

impl DeParse for Ipv6 {
    type Error = ();

    fn size(&self) -> NonZero<usize> {
        NonZero::new(Self::HEADER_LEN).unwrap_or_else(|| unreachable!())
    }

    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>> {
        let len = buf.len();
        if len < Self::HEADER_LEN {
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
    use crate::ipv4::proto;

    #[test]
    fn round_trips_through_parse_and_deparse() {
        let ip = Ipv6::new(
            0,
            proto::TCP,
            64,
            Ipv6Addr::LOCALHOST,
            Ipv6Addr::UNSPECIFIED,
        );
        let mut buf = [0u8; Ipv6::HEADER_LEN];
        ip.deparse(&mut buf).unwrap();
        let (parsed, consumed) = Ipv6::parse(&buf).unwrap();
        assert_eq!(consumed.get(), Ipv6::HEADER_LEN);
        assert_eq!(parsed, ip);
    }

    #[test]
    fn decrementing_zero_hop_limit_errors() {
        let mut ip = Ipv6::new(0, proto::UDP, 0, Ipv6Addr::LOCALHOST, Ipv6Addr::LOCALHOST);
        assert!(ip.decrement_hop_limit().is_err());
    }
}
