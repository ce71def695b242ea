//! Identifiers, tokens and fixed wire preambles shared by both protocols.

use rand::RngCore;
use sha1::{Digest, Sha1};
use std::fmt;
use std::net::IpAddr;

/// Length of DHT node ids, info-hashes and peer ids.
pub const ID_LEN: usize = 20;
/// Number of leading target bytes kept by [`neighbor_id`].
pub const NEIGHBOR_PREFIX_LEN: usize = 15;
/// Protocol name sent in the BitTorrent handshake.
pub const PROTOCOL_NAME: &[u8; 19] = b"BitTorrent protocol";
/// Offset of the reserved byte carrying the extension protocol flag (BEP-10).
pub const EXTENSION_BYTE: usize = 5;
/// Extension protocol flag within [`EXTENSION_BYTE`].
pub const EXTENSION_BIT: u8 = 0x10;
/// Length of [`handshake_preamble`]: length byte, protocol name, reserved bytes.
pub const PREAMBLE_LEN: usize = 1 + PROTOCOL_NAME.len() + 8;

/// Fills an `N` byte array from the thread-local CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generates a 2-byte KRPC transaction id.
pub fn transaction_id() -> [u8; 2] {
    random_bytes()
}

/// A 20-byte DHT node id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId([u8; ID_LEN]);

impl NodeId {
    /// Generates a random id, used once per crawler lifetime.
    pub fn random() -> Self {
        NodeId(random_bytes())
    }

    /// Parses an id from a slice of exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(NodeId)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl From<[u8; ID_LEN]> for NodeId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        NodeId(bytes)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

/// A 20-byte torrent info-hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; ID_LEN]);

impl InfoHash {
    /// Parses an info-hash from a slice of exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(InfoHash)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Lowercase hex form, as handed to indexers.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; ID_LEN]> for InfoHash {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        InfoHash(bytes)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

/// Derives an id that looks maximally close to `target` to other nodes.
///
/// The result is the first 15 bytes of `target` followed by the last 5 bytes
/// of `id`. Queriers then see us as a near neighbor of whatever they asked
/// about, without us holding any routing state.
///
/// # Returns
///
/// `None` if `target` is shorter than 15 bytes.
pub fn neighbor_id(id: &NodeId, target: &[u8]) -> Option<NodeId> {
    let prefix = target.get(..NEIGHBOR_PREFIX_LEN)?;
    let mut neighbor = [0u8; ID_LEN];
    neighbor[..NEIGHBOR_PREFIX_LEN].copy_from_slice(prefix);
    neighbor[NEIGHBOR_PREFIX_LEN..].copy_from_slice(&id.0[NEIGHBOR_PREFIX_LEN..]);
    Some(NodeId(neighbor))
}

/// Secret used to derive `get_peers` tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(Vec<u8>);

impl TokenSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        TokenSecret(secret.into())
    }

    /// A fresh random secret, the default for a crawler instance.
    pub fn random() -> Self {
        TokenSecret(random_bytes::<16>().to_vec())
    }

    /// Derives the token for `ip`: SHA-1 of the textual address followed by the secret.
    pub fn token(&self, ip: &IpAddr) -> [u8; ID_LEN] {
        let mut hasher = Sha1::new();
        hasher.update(ip.to_string().as_bytes());
        hasher.update(&self.0);
        let digest = hasher.finalize();

        let mut token = [0u8; ID_LEN];
        token.copy_from_slice(&digest);
        token
    }

    /// Checks a token presented by `ip` by re-deriving it.
    pub fn verify(&self, ip: &IpAddr, token: &[u8]) -> bool {
        self.token(ip).as_slice() == token
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

/// The fixed 28-byte start of every BitTorrent handshake.
///
/// Protocol name length, protocol name, then eight reserved bytes with only
/// the extension protocol bit set.
pub fn handshake_preamble() -> [u8; PREAMBLE_LEN] {
    let mut preamble = [0u8; PREAMBLE_LEN];
    preamble[0] = PROTOCOL_NAME.len() as u8;
    preamble[1..1 + PROTOCOL_NAME.len()].copy_from_slice(PROTOCOL_NAME);
    preamble[1 + PROTOCOL_NAME.len() + EXTENSION_BYTE] = EXTENSION_BIT;
    preamble
}
