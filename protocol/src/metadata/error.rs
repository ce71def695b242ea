//! Error types for metadata fetch sessions.

use crate::bencode::DecodeError;
use std::error::Error;
use std::fmt;
use std::io;

/// Errors that abort a metadata fetch session.
///
/// Every variant is terminal for the session: the connection is dropped and
/// the info-hash is not retried.
#[derive(Debug)]
pub enum FetchError {
    /// An I/O error occurred while connecting, reading or writing.
    Io(io::Error),
    /// Connect, a read, or the whole session ran past its deadline.
    TimedOut,
    /// A bencoded payload from the peer could not be decoded.
    Decode(DecodeError),
    /// Handshake did not start with the BitTorrent protocol name.
    NotBitTorrent,
    /// Peer did not set the extension protocol bit (BEP-10).
    ExtensionsUnsupported,
    /// Peer answered the handshake for a different info-hash.
    InfoHashMismatch,
    /// An extended message arrived with a sub-id that is not valid at this point.
    UnexpectedExtendedMessage(u8),
    /// A frame declared a length above the accepted maximum.
    MessageTooLarge(usize),
    /// A required field is missing or has the wrong type.
    MissingField(&'static str),
    /// Declared `metadata_size` is zero, negative or above the 16 MiB cap.
    InvalidMetadataSize(i64),
    /// Peer's `ut_metadata` id is outside `1..=255`.
    InvalidExtensionId(i64),
    /// A data message carried a piece index outside `0..piece_count`.
    PieceOutOfRange(i64),
    /// A data message carried a piece whose size differs from the expected one.
    InvalidPieceLength { piece: usize, len: usize },
    /// A `ut_metadata` message that is not a data message (e.g. a reject).
    UnexpectedMsgType(i64),
    /// Reassembled metadata does not hash to the requested info-hash.
    ChecksumMismatch,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Io(err) => write!(f, "Peer connection error: {err}"),
            FetchError::TimedOut => write!(f, "Peer did not respond in time"),
            FetchError::Decode(err) => write!(f, "Malformed bencode from peer: {err}"),
            FetchError::NotBitTorrent => {
                write!(f, "Remote peer does not speak the BitTorrent protocol")
            }
            FetchError::ExtensionsUnsupported => {
                write!(f, "Remote peer does not support the extension protocol")
            }
            FetchError::InfoHashMismatch => write!(f, "Handshake echoed a different info-hash"),
            FetchError::UnexpectedExtendedMessage(id) => {
                write!(f, "Unexpected extended message id {id}")
            }
            FetchError::MessageTooLarge(len) => write!(f, "Peer message of {len} bytes too large"),
            FetchError::MissingField(field) => write!(f, "Missing or malformed field '{field}'"),
            FetchError::InvalidMetadataSize(size) => write!(f, "Invalid metadata_size {size}"),
            FetchError::InvalidExtensionId(id) => write!(f, "Invalid ut_metadata id {id}"),
            FetchError::PieceOutOfRange(piece) => write!(f, "Metadata piece {piece} out of range"),
            FetchError::InvalidPieceLength { piece, len } => {
                write!(f, "Metadata piece {piece} has invalid length {len}")
            }
            FetchError::UnexpectedMsgType(msg_type) => {
                write!(f, "Expected ut_metadata data message, got msg_type {msg_type}")
            }
            FetchError::ChecksumMismatch => {
                write!(f, "Metadata checksum does not match info-hash")
            }
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FetchError::Io(err) => Some(err),
            FetchError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        FetchError::Io(err)
    }
}

impl From<DecodeError> for FetchError {
    fn from(err: DecodeError) -> Self {
        FetchError::Decode(err)
    }
}

impl From<tokio::time::error::Elapsed> for FetchError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FetchError::TimedOut
    }
}
