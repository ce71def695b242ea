//! BEP-9 metadata exchange over the BitTorrent peer wire.
//!
//! A fetch session walks a fixed sequence against one peer: BitTorrent
//! handshake, BEP-10 extension handshake, a request for every metadata piece,
//! then reassembly and SHA-1 verification against the info-hash. Any deviation
//! aborts the session with a [`FetchError`]; nothing is retried.
//!
//! # Example
//!
//! ```no_run
//! use dht_spider_protocol::{fetch, FetchConfiguration, InfoHash};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let info_hash = InfoHash::from([0u8; 20]);
//! let record = fetch(
//!     "192.0.2.1:6881".parse()?,
//!     info_hash,
//!     &FetchConfiguration::default(),
//! )
//! .await?;
//! println!("{record}");
//! # Ok(())
//! # }
//! ```

mod configuration;
mod error;
mod handshake;
mod io;
mod tcp;
mod torrent;

pub use configuration::{
    FetchConfiguration, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_SESSION_TIMEOUT,
};
pub use error::FetchError;
pub use handshake::{build_handshake, HANDSHAKE_LEN, LOCAL_UT_METADATA_ID};
pub use io::{PeerWire, EXTENDED, EXTENDED_HANDSHAKE, MAX_MESSAGE_LEN};
pub use tcp::connect;
pub use torrent::{TorrentFile, TorrentRecord};

use crate::bencode::{self, Value};
use crate::primitives::{random_bytes, InfoHash, ID_LEN};
use log::debug;
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

/// Size of one metadata piece.
pub const PIECE_SIZE: usize = 16 * 1024;
/// Largest metadata accepted: 1024 pieces.
pub const MAX_METADATA_SIZE: usize = 1024 * PIECE_SIZE;

/// `ut_metadata` message types.
const MSG_REQUEST: i64 = 0;
const MSG_DATA: i64 = 1;

/// Per-fetch reassembly state.
///
/// Created once the peer's extension handshake has been validated, filled by
/// data messages, and consumed by [`MetadataSession::into_metadata`].
#[derive(Debug)]
pub struct MetadataSession {
    info_hash: InfoHash,
    metadata_size: usize,
    /// Sub-id the peer wants `ut_metadata` requests sent with.
    peer_ut_metadata: u8,
    /// `None` until the piece at that index has arrived.
    pieces: Vec<Option<Vec<u8>>>,
}

impl MetadataSession {
    /// Validates the peer's extension handshake and sizes the piece table.
    ///
    /// # Errors
    ///
    /// * [`FetchError::Decode`] - Payload is not bencode.
    /// * [`FetchError::MissingField`] - `metadata_size` or `m.ut_metadata` absent.
    /// * [`FetchError::InvalidMetadataSize`] - Size is not in `1..=16 MiB`.
    /// * [`FetchError::InvalidExtensionId`] - `ut_metadata` is not in `1..=255`.
    pub fn from_extended_handshake(info_hash: InfoHash, payload: &[u8]) -> Result<Self, FetchError> {
        let handshake = bencode::decode(payload)?;

        let metadata_size = handshake
            .get(b"metadata_size")
            .and_then(Value::as_integer)
            .ok_or(FetchError::MissingField("metadata_size"))?;
        if metadata_size <= 0 || metadata_size > MAX_METADATA_SIZE as i64 {
            return Err(FetchError::InvalidMetadataSize(metadata_size));
        }

        let ut_metadata = handshake
            .get(b"m")
            .and_then(|m| m.get(b"ut_metadata"))
            .and_then(Value::as_integer)
            .ok_or(FetchError::MissingField("ut_metadata"))?;
        let peer_ut_metadata = u8::try_from(ut_metadata)
            .ok()
            .filter(|&id| id != 0)
            .ok_or(FetchError::InvalidExtensionId(ut_metadata))?;

        let metadata_size = metadata_size as usize;
        let piece_count = metadata_size.div_ceil(PIECE_SIZE);

        Ok(Self {
            info_hash,
            metadata_size,
            peer_ut_metadata,
            pieces: vec![None; piece_count],
        })
    }

    pub fn metadata_size(&self) -> usize {
        self.metadata_size
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn peer_ut_metadata(&self) -> u8 {
        self.peer_ut_metadata
    }

    /// Request payloads for every piece, in index order.
    pub fn piece_requests(&self) -> impl Iterator<Item = Vec<u8>> {
        (0..self.pieces.len() as i64).map(|piece| {
            bencode::encode(&Value::dict([
                ("msg_type", Value::Integer(MSG_REQUEST)),
                ("piece", Value::Integer(piece)),
            ]))
        })
    }

    /// Stores the piece carried by a `ut_metadata` data message.
    ///
    /// The payload is a bencoded header immediately followed by raw piece
    /// bytes. The header ends at the first `ee`, which closes both its last
    /// integer and the dictionary itself.
    pub fn on_data(&mut self, payload: &[u8]) -> Result<(), FetchError> {
        let header_end = payload
            .windows(2)
            .position(|window| window == b"ee")
            .map(|i| i + 2)
            .ok_or(FetchError::MissingField("ut_metadata header"))?;
        let header = bencode::decode(&payload[..header_end])?;

        let msg_type = header
            .get(b"msg_type")
            .and_then(Value::as_integer)
            .ok_or(FetchError::MissingField("msg_type"))?;
        if msg_type != MSG_DATA {
            return Err(FetchError::UnexpectedMsgType(msg_type));
        }

        let piece = header
            .get(b"piece")
            .and_then(Value::as_integer)
            .ok_or(FetchError::MissingField("piece"))?;
        let index = usize::try_from(piece)
            .ok()
            .filter(|&index| index < self.pieces.len())
            .ok_or(FetchError::PieceOutOfRange(piece))?;

        let bytes = &payload[header_end..];
        if bytes.len() != self.piece_len(index) {
            return Err(FetchError::InvalidPieceLength {
                piece: index,
                len: bytes.len(),
            });
        }
        self.pieces[index] = Some(bytes.to_vec());
        Ok(())
    }

    /// Every piece is full size except possibly the last.
    fn piece_len(&self, index: usize) -> usize {
        (self.metadata_size - index * PIECE_SIZE).min(PIECE_SIZE)
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(Option::is_some)
    }

    /// Concatenates the pieces and checks them against the info-hash.
    ///
    /// # Errors
    ///
    /// * [`FetchError::PieceOutOfRange`] - Called before every piece arrived.
    /// * [`FetchError::ChecksumMismatch`] - SHA-1 differs from the info-hash.
    pub fn into_metadata(self) -> Result<Vec<u8>, FetchError> {
        let mut metadata = Vec::with_capacity(self.metadata_size);
        for (index, piece) in self.pieces.into_iter().enumerate() {
            let piece = piece.ok_or(FetchError::PieceOutOfRange(index as i64))?;
            metadata.extend_from_slice(&piece);
        }

        let digest = Sha1::digest(&metadata);
        if digest.as_slice() != self.info_hash.as_bytes() {
            return Err(FetchError::ChecksumMismatch);
        }
        Ok(metadata)
    }
}

async fn exchange<S>(
    wire: &mut PeerWire<S>,
    info_hash: InfoHash,
    peer_id: &[u8; ID_LEN],
) -> Result<TorrentRecord, FetchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    wire.handshake(&info_hash, peer_id).await?;
    wire.send_extended(EXTENDED_HANDSHAKE, &handshake::extended_handshake())
        .await?;

    let (extended_id, payload) = wire.receive_extended().await?;
    if extended_id != EXTENDED_HANDSHAKE {
        return Err(FetchError::UnexpectedExtendedMessage(extended_id));
    }
    let mut session = MetadataSession::from_extended_handshake(info_hash, &payload)?;
    debug!(
        "Peer offers {} bytes of metadata for {} in {} pieces",
        session.metadata_size(),
        info_hash,
        session.piece_count()
    );

    let requests: Vec<Vec<u8>> = session.piece_requests().collect();
    for request in requests {
        wire.send_extended(session.peer_ut_metadata(), &request)
            .await?;
    }

    while !session.is_complete() {
        let (extended_id, payload) = wire.receive_extended().await?;
        if extended_id != LOCAL_UT_METADATA_ID {
            return Err(FetchError::UnexpectedExtendedMessage(extended_id));
        }
        session.on_data(&payload)?;
    }

    let metadata = session.into_metadata()?;
    TorrentRecord::from_info(info_hash, &metadata)
}

/// Runs a complete fetch session over an established stream.
///
/// The whole exchange is bounded by `config.session_timeout` and each read by
/// `config.read_timeout`.
///
/// # Arguments
///
/// * `stream` - A connected peer-wire stream.
/// * `info_hash` - The torrent whose metadata is wanted.
/// * `peer_id` - Our peer id for the handshake.
/// * `config` - Timeouts.
pub async fn fetch_metadata<S>(
    stream: S,
    info_hash: InfoHash,
    peer_id: [u8; ID_LEN],
    config: &FetchConfiguration,
) -> Result<TorrentRecord, FetchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut wire = PeerWire::new(stream, config.read_timeout);
    timeout(
        config.session_timeout,
        exchange(&mut wire, info_hash, &peer_id),
    )
    .await?
}

/// Connects to `addr` and fetches the metadata for `info_hash`.
///
/// A fresh random peer id is used for every session.
pub async fn fetch(
    addr: SocketAddr,
    info_hash: InfoHash,
    config: &FetchConfiguration,
) -> Result<TorrentRecord, FetchError> {
    let stream = connect(addr, config.connect_timeout).await?;
    fetch_metadata(stream, info_hash, random_bytes(), config).await
}
