pub mod bencode;
pub mod krpc;
mod metadata;
mod primitives;

pub use metadata::{
    build_handshake, connect, fetch, fetch_metadata, FetchConfiguration, FetchError,
    MetadataSession, PeerWire, TorrentFile, TorrentRecord, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_READ_TIMEOUT, DEFAULT_SESSION_TIMEOUT, EXTENDED, EXTENDED_HANDSHAKE, HANDSHAKE_LEN,
    LOCAL_UT_METADATA_ID, MAX_MESSAGE_LEN, MAX_METADATA_SIZE, PIECE_SIZE,
};
pub use primitives::{
    handshake_preamble, neighbor_id, random_bytes, transaction_id, InfoHash, NodeId, TokenSecret,
    ID_LEN, NEIGHBOR_PREFIX_LEN, PREAMBLE_LEN,
};
