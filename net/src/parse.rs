// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parsing traits shared by every header type in this crate.

use std::num::NonZero;

/// Parse a header from the front of a byte slice.
pub trait Parse: Sized {
    /// The error produced when the bytes are present but not a valid header.
    type Error: core::error::Error;

    /// Parse a value and report how many bytes it consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is too short or the header is invalid.
    fn parse(buf: &[u8]) -> Result<(Self, NonZero<usize>), ParseError<Self::Error>>;
}

/// Serialize a header to the front of a byte slice.
pub trait DeParse {
    /// The error produced when serialization fails.
    type Error;

    /// The number of bytes this value will occupy once serialized.
    fn size(&self) -> NonZero<usize>;

    /// Write this value to `buf`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too short.
    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<usize>, DeParseError<Self::Error>>;
}

/// A length mismatch between what a header needs and what a buffer offers.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("expected at least {expected} bytes, got {actual}")]
pub struct LengthError {
    /// Bytes required.
    pub expected: NonZero<usize>,
    /// Bytes available.
    pub actual: usize,
}

/// Error produced while parsing a header.
#[derive(thiserror::Error, Debug)]
pub enum ParseError<E: core::error::Error> {
    /// The buffer was too short for this header.
    #[error(transparent)]
    Length(LengthError),
    /// The bytes present do not form a valid header.
    #[error(transparent)]
    Invalid(E),
}

/// Error produced while serializing a header.
#[derive(thiserror::Error, Debug)]
pub enum DeParseError<E> {
    /// The destination buffer was too short for this header.
    #[error(transparent)]
    Length(LengthError),
    /// The value cannot be serialized.
    #[error(transparent)]
    Invalid(E),
}
