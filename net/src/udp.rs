// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! UDP header type.

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use etherparse::UdpHeader;
use std::num::NonZero;

/// A UDP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Udp(UdpHeader);

impl Udp {
    /// Fixed length of a UDP header.
    pub const LEN: usize = UdpHeader::LEN;

    /// Build a new header. `length` is the header plus payload, in bytes.
    #[must_use]
    pub fn new(source: u16, destination: u16, length: u16, checksum: u16) -> Self {
        Self(UdpHeader {
            source_port: source,
            destination_port: destination,
            length,
            checksum,
        })
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

    /// `length` field: header plus payload, in bytes.
    #[must_use]
    pub const fn length(&self) -> u16 {
        self.0.length
    }

    /// Set the `length` field.
    pub fn set_length(&mut self, length: u16) -> &mut Self {
        self.0.length = length;
        self
    }

    /// Checksum field. Zero means "no checksum" over IPv4.
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.0.checksum
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, checksum: u16) -> &mut Self {
        self.0.checksum = checksum;
        self
    }
}

/// Error parsing a [`Udp`] header.
#[derive(Debug, thiserror::Error)]
pub enum UdpError {
    /// Zero is not a legal source port.
    #[error("zero source port")]
    ZeroSourcePort,
    /// Zero is not a legal destination port.
    #[error("zero destination port")]
    ZeroDestPort,
}

impl Parse for Udp {
    type Error = UdpError;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (inner, rest) = UdpHeader::from_slice(buf).map_err(|e| {
            ParseError::Length(LengthError {
                expected: NonZero::new(e.required_len).unwrap_or_else(|| unreachable!()),
                actual: buf.len(),
            })
        })?;
        let consumed =
            NonZero::new(buf.len() - rest.len()).ok_or(ParseError::Length(LengthError {
                expected: NonZero::new(Self::LEN).unwrap_or_else(|| unreachable!()),
                actual: 0,
            }))?;
        if inner.source_port == 0 {
            return Err(ParseError::Invalid(UdpError::ZeroSourcePort));
        }
        if inner.destination_port == 0 {
            return Err(ParseError::Invalid(UdpError::ZeroDestPort));
        }
        Ok((Self(inner), consumed))
    }
}

impl DeParse for Udp {
    type Error = ();

    fn size(&self) -> NonZero<usize> {
        NonZero::new(Self::LEN).unwrap_or_else(|| unreachable!())
    }

    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>> {
        let len = buf.len();
        if len < Self::LEN {
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
        let udp = Udp::new(53, 54321, Udp::LEN as u16, 0);
        let mut buf = [0u8; Udp::LEN];
        udp.deparse(&mut buf).unwrap();
        let (parsed, consumed) = Udp::parse(&buf).unwrap();
        assert_eq!(consumed.get(), Udp::LEN);
        assert_eq!(parsed, udp);
    }

    #[test]
    fn zero_destination_port_is_rejected() {
        let udp = Udp::new(53, 0, Udp::LEN as u16, 0);
        let mut buf = [0u8; Udp::LEN];
        udp.deparse(&mut buf).unwrap();
        assert!(matches!(
            Udp::parse(&buf),
            Err(ParseError::Invalid(UdpError::ZeroDestPort))
        ));
    }
}
