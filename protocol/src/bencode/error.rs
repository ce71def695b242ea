//! Error types for bencode decoding.

use std::error::Error;
use std::fmt;

/// Errors that can occur while decoding bencode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the value was complete.
    UnexpectedEof,
    /// A byte that cannot start or continue a value at this position.
    UnexpectedByte { byte: u8, position: usize },
    /// A byte string length prefix that is not a valid decimal number.
    InvalidLength { position: usize },
    /// An integer that is empty, has leading zeros, is `-0` or overflows.
    InvalidInteger { position: usize },
    /// A dictionary key that is not a byte string.
    NonStringKey { position: usize },
    /// Lists and dictionaries nested deeper than [`super::MAX_DEPTH`].
    NestingTooDeep,
    /// Bytes remain after the top-level value.
    TrailingData { position: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "Unexpected end of bencode input"),
            DecodeError::UnexpectedByte { byte, position } => {
                write!(f, "Unexpected byte 0x{byte:02x} at offset {position}")
            }
            DecodeError::InvalidLength { position } => {
                write!(f, "Invalid byte string length at offset {position}")
            }
            DecodeError::InvalidInteger { position } => {
                write!(f, "Invalid integer at offset {position}")
            }
            DecodeError::NonStringKey { position } => {
                write!(f, "Dictionary key at offset {position} is not a byte string")
            }
            DecodeError::NestingTooDeep => write!(f, "Bencode nesting too deep"),
            DecodeError::TrailingData { position } => {
                write!(f, "Trailing data after value at offset {position}")
            }
        }
    }
}

impl Error for DecodeError {}
