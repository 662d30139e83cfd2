// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ICMP header types.
//!
//! The echo engine (see the `icmp` crate) only ever originates and
//! terminates echo request/reply pairs, so these wrappers expose just that
//! slice of `etherparse`'s `Icmpv4Type`/`Icmpv6Type`, not the full error
//! message taxonomy the teacher's `icmp4`/`icmp6` modules carry.

use crate::parse::{DeParse, DeParseError, LengthError, Parse, ParseError};
use etherparse::icmpv4::IcmpEchoHeader as Icmpv4EchoHeader;
use etherparse::icmpv6::IcmpEchoHeader as Icmpv6EchoHeader;
use etherparse::{Icmpv4Header, Icmpv4Type, Icmpv6Header, Icmpv6Type};
use std::num::NonZero;

/// An `ICMPv4` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp4(Icmpv4Header);

impl Icmp4 {
    /// Build an echo request header with checksum zeroed (filled in later).
    #[must_use]
    pub fn echo_request(id: u16, seq: u16) -> Self {
        Self(Icmpv4Header {
            icmp_type: Icmpv4Type::EchoRequest(Icmpv4EchoHeader { id, seq }),
            checksum: 0,
        })
    }

    /// Build an echo reply header with checksum zeroed (filled in later).
    #[must_use]
    pub fn echo_reply(id: u16, seq: u16) -> Self {
        Self(Icmpv4Header {
            icmp_type: Icmpv4Type::EchoReply(Icmpv4EchoHeader { id, seq }),
            checksum: 0,
        })
    }

    /// The `id`/`seq` pair, if this is an echo request or reply.
    #[must_use]
    pub fn echo_id_seq(&self) -> Option<(u16, u16)> {
        match self.0.icmp_type {
            Icmpv4Type::EchoRequest(h) | Icmpv4Type::EchoReply(h) => Some((h.id, h.seq)),
            _ => None,
        }
    }

    /// True if this is an echo request.
    #[must_use]
    pub fn is_echo_request(&self) -> bool {
        matches!(self.0.icmp_type, Icmpv4Type::EchoRequest(_))
    }

    /// True if this is an echo reply.
    #[must_use]
    pub fn is_echo_reply(&self) -> bool {
        matches!(self.0.icmp_type, Icmpv4Type::EchoReply(_))
    }

    /// Overwrite the echo id field, if this is an echo request or reply.
    ///
    /// # Errors
    ///
    /// Returns [`IcmpError::NotEcho`] for any other ICMP type.
    pub fn set_echo_id(&mut self, id: u16) -> Result<(), IcmpError> {
        match &mut self.0.icmp_type {
            Icmpv4Type::EchoRequest(h) | Icmpv4Type::EchoReply(h) => {
                h.id = id;
                Ok(())
            }
            _ => Err(IcmpError::NotEcho),
        }
    }

    /// Header checksum.
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.0.checksum
    }

    /// Overwrite the checksum.
    pub fn set_checksum(&mut self, checksum: u16) -> &mut Self {
        self.0.checksum = checksum;
        self
    }
}

/// An `ICMPv6` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp6(Icmpv6Header);

impl Icmp6 {
    /// Build an echo request header with checksum zeroed (filled in later).
    #[must_use]
    pub fn echo_request(id: u16, seq: u16) -> Self {
        Self(Icmpv6Header {
            icmp_type: Icmpv6Type::EchoRequest(Icmpv6EchoHeader { id, seq }),
            checksum: 0,
        })
    }

    /// Build an echo reply header with checksum zeroed (filled in later).
    #[must_use]
    pub fn echo_reply(id: u16, seq: u16) -> Self {
        Self(Icmpv6Header {
            icmp_type: Icmpv6Type::EchoReply(Icmpv6EchoHeader { id, seq }),
            checksum: 0,
        })
    }

    /// The `id`/`seq` pair, if this is an echo request or reply.
    #[must_use]
    pub fn echo_id_seq(&self) -> Option<(u16, u16)> {
        match self.0.icmp_type {
            Icmpv6Type::EchoRequest(h) | Icmpv6Type::EchoReply(h) => Some((h.id, h.seq)),
            _ => None,
        }
    }

    /// True if this is an echo request.
    #[must_use]
    pub fn is_echo_request(&self) -> bool {
        matches!(self.0.icmp_type, Icmpv6Type::EchoRequest(_))
    }

    /// True if this is an echo reply.
    #[must_use]
    pub fn is_echo_reply(&self) -> bool {
        matches!(self.0.icmp_type, Icmpv6Type::EchoReply(_))
    }

    /// Overwrite the echo id field, if this is an echo request or reply.
    ///
    /// # Errors
    ///
    /// Returns [`IcmpError::NotEcho`] for any other ICMP type.
    pub fn set_echo_id(&mut self, id: u16) -> Result<(), IcmpError> {
        match &mut self.0.icmp_type {
            Icmpv6Type::EchoRequest(h) | Icmpv6Type::EchoReply(h) => {
                h.id = id;
                Ok(())
            }
            _ => Err(IcmpError::NotEcho),
        }
    }

    /// Header checksum.
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.0.checksum
    }

    /// Overwrite the checksum.
    pub fn set_checksum(&mut self, checksum: u16) -> &mut Self {
        self.0.checksum = checksum;
        self
    }
}

/// Error manipulating an ICMP header.
#[derive(Debug, thiserror::Error)]
pub enum IcmpError {
    /// The operation only applies to echo request/reply messages.
    #[error("not an echo request or reply")]
    NotEcho,
}

impl Parse for Icmp4 {
    type Error = LengthError;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (inner, rest) = Icmpv4Header::from_slice(buf).map_err(|e| {
            ParseError::Length(LengthError {
                expected: NonZero::new(e.required_len).unwrap_or_else(|| unreachable!()),
                actual: buf.len(),
            })
        })?;
        let consumed =
            NonZero::new(buf.len() - rest.len()).ok_or(ParseError::Length(LengthError {
                expected: NonZero::new(1).unwrap_or_else(|| unreachable!()),
                actual: 0,
            }))?;
        Ok((Self(inner), consumed))
    }
}

impl DeParse for Icmp4 {
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
        buf[..self.size().get()].copy_from_slice(&self.0.to_bytes());
        Ok(self.size())
    }
}

impl Parse for Icmp6 {
    type Error = LengthError;

    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>> {
        let (inner, rest) = Icmpv6Header::from_slice(buf).map_err(|e| {
            ParseError::Length(LengthError {
                expected: NonZero::new(e.required_len).unwrap_or_else(|| unreachable!()),
                actual: buf.len(),
            })
        })?;
        let consumed =
            NonZero::new(buf.len() - rest.len()).ok_or(ParseError::Length(LengthError {
                expected: NonZero::new(1).unwrap_or_else(|| unreachable!()),
                actual: 0,
            }))?;
        Ok((Self(inner), consumed))
    }
}

impl DeParse for Icmp6 {
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
        buf[..self.size().get()].copy_from_slice(&self.0.to_bytes());
        Ok(self.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_round_trips() {
        let icmp = Icmp4::echo_request(0x1234, 1);
        let mut buf = [0u8; 8];
        icmp.deparse(&mut buf).unwrap();
        let (parsed, _) = Icmp4::parse(&buf).unwrap();
        assert_eq!(parsed.echo_id_seq(), Some((0x1234, 1)));
        assert!(parsed.is_echo_request());
    }

    #[test]
    fn set_echo_id_rejects_non_echo_types() {
        let mut icmp = Icmp4(Icmpv4Header {
            icmp_type: Icmpv4Type::Unknown {
                type_u8: 99,
                code_u8: 0,
                bytes5to8: [0; 4],
            },
            checksum: 0,
        });
        assert!(matches!(icmp.set_echo_id(1), Err(IcmpError::NotEcho)));
    }
}
