// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet header type.

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use etherparse::{EtherType, Ethernet2Header};
use std::num::NonZero;

/// A MAC address.
pub type Mac = [u8; 6];

/// The broadcast MAC address, `ff:ff:ff:ff:ff:ff`.
pub const BROADCAST: Mac = [0xff; 6];

/// An Ethernet II header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eth(Ethernet2Header);

impl Eth {
    /// Length in bytes of an [`Eth`] header (no 802.1Q tag).
    pub const HEADER_LEN: usize = 14;

    /// Build a new header.
    #[must_use]
    pub fn new(source: Mac, destination: Mac, ether_type: u16) -> Self {
        Eth(Ethernet2Header {
            source,
            destination,
            ether_type: EtherType(ether_type),
        })
    }

    /// Source MAC address.
    #[must_use]
    pub fn source(&self) -> Mac {
        self.0.source
    }

    /// Destination MAC address.
    #[must_use]
    pub fn destination(&self) -> Mac {
        self.0.destination
    }

    /// EtherType field (host byte order).
    #[must_use]
    pub fn ether_type(&self) -> u16 {
        self.0.ether_type.0
    }

    /// Overwrite the source MAC address.
    pub fn set_source(&mut self, source: Mac) -> &mut Self {
        self.0.source = source;
        self
    }

    /// Overwrite the destination MAC address.
    pub fn set_destination(&mut self, destination: Mac) -> &mut Self {
        self.0.destination = destination;
        self
    }
}

/// EtherType values the demultiplexer cares about.
pub mod ethertype {
    /// IPv4.
    pub const IPV4: u16 = 0x0800;
    /// ARP.
    pub const ARP: u16 = 0x0806;
    /// IPv6.
    pub const IPV6: u16 = 0x86DD;
}

impl Parse for Eth {
    type Error = core::convert::Infallible;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (inner, rest) = Ethernet2Header::from_slice(buf).map_err(|e| {
            ParseError::Length(LengthError {
                expected: NonZero::new(e.required_len).unwrap_or_else(|| unreachable!()),
                actual: buf.len(),
            })
        })?;
        let consumed =
            NonZero::new(buf.len() - rest.len()).ok_or(ParseError::Length(LengthError {
                expected: NonZero::new(Self::HEADER_LEN).unwrap_or_else(|| unreachable!()),
                actual: 0,
            }))?;
        Ok((Self(inner), consumed))
    }
}

impl DeParse for Eth {
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

    #[test]
    fn round_trips_through_parse_and_deparse() {
        let eth = Eth::new([1, 2, 3, 4, 5, 6], BROADCAST, ethertype::IPV4);
        let mut buf = [0u8; Eth::HEADER_LEN];
        eth.deparse(&mut buf).unwrap();
        let (parsed, consumed) = Eth::parse(&buf).unwrap();
        assert_eq!(consumed.get(), Eth::HEADER_LEN);
        assert_eq!(parsed, eth);
    }
}
