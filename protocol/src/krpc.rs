//! KRPC message model (BEP-5).
//!
//! Inbound datagrams are decoded into [`Message`], a typed view over the raw
//! bencode dictionary. Anything that does not have the expected shape is
//! rejected with a [`KrpcError`] so the caller can drop it and move on.
//! Outbound requests and responses are plain [`Value`] dictionaries built by
//! the helpers at the bottom of this module.

use crate::bencode::{Dict, Value};
use crate::primitives::{InfoHash, NodeId, ID_LEN};
use std::error::Error;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Size of one compact node info entry: id, IPv4 address, port.
pub const COMPACT_NODE_LEN: usize = ID_LEN + 4 + 2;

/// Reasons an inbound datagram is not a usable KRPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KrpcError {
    /// Top level is not a dictionary.
    NotADict,
    /// A required key is absent.
    MissingField(&'static str),
    /// A key is present with the wrong type or size.
    InvalidField(&'static str),
    /// `y` is neither `q`, `r` nor `e`.
    UnknownType(Vec<u8>),
}

impl fmt::Display for KrpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KrpcError::NotADict => write!(f, "KRPC message is not a dictionary"),
            KrpcError::MissingField(field) => write!(f, "KRPC message missing '{field}'"),
            KrpcError::InvalidField(field) => write!(f, "KRPC field '{field}' is malformed"),
            KrpcError::UnknownType(y) => {
                write!(f, "Unknown KRPC message type {}", String::from_utf8_lossy(y))
            }
        }
    }
}

impl Error for KrpcError {}

/// A query received from another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ping {
        /// Querier's id, when it sent one as a byte string.
        id: Option<Vec<u8>>,
    },
    FindNode {
        id: Option<Vec<u8>>,
    },
    GetPeers {
        id: Option<Vec<u8>>,
        info_hash: InfoHash,
    },
    AnnouncePeer {
        id: Option<Vec<u8>>,
        info_hash: InfoHash,
        /// Declared TCP port, if present.
        port: Option<i64>,
        /// `implied_port` flag, if present.
        implied_port: Option<i64>,
        /// Token from an earlier `get_peers`, if present.
        token: Option<Vec<u8>>,
    },
    /// A method this crawler does not answer.
    Other(Vec<u8>),
}

/// Body of a decoded KRPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Query(Query),
    /// The `r` dictionary of a response.
    Response(Dict),
    /// An error message; its contents are never inspected.
    Error,
}

/// A decoded inbound KRPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque transaction id, echoed verbatim in any response.
    pub transaction_id: Vec<u8>,
    pub body: Body,
}

impl Message {
    /// Interprets a decoded datagram as a KRPC message.
    ///
    /// # Errors
    ///
    /// Returns [`KrpcError`] when `t`, `y`, `q`, `a` or `r` are missing or
    /// mistyped, or when `get_peers`/`announce_peer` lack a 20-byte `info_hash`.
    pub fn from_value(value: &Value) -> Result<Self, KrpcError> {
        let dict = value.as_dict().ok_or(KrpcError::NotADict)?;
        let transaction_id = bytes_field(dict, "t")?.to_vec();
        let kind = bytes_field(dict, "y")?;

        let body = match kind {
            b"q" => Body::Query(parse_query(dict)?),
            b"r" => {
                let r = dict.get(&b"r"[..]).ok_or(KrpcError::MissingField("r"))?;
                Body::Response(r.as_dict().ok_or(KrpcError::InvalidField("r"))?.clone())
            }
            b"e" => Body::Error,
            other => return Err(KrpcError::UnknownType(other.to_vec())),
        };

        Ok(Message {
            transaction_id,
            body,
        })
    }
}

fn bytes_field<'a>(dict: &'a Dict, key: &'static str) -> Result<&'a [u8], KrpcError> {
    dict.get(key.as_bytes())
        .ok_or(KrpcError::MissingField(key))?
        .as_bytes()
        .ok_or(KrpcError::InvalidField(key))
}

fn info_hash_field(args: &Dict) -> Result<InfoHash, KrpcError> {
    InfoHash::from_slice(bytes_field(args, "info_hash")?)
        .ok_or(KrpcError::InvalidField("info_hash"))
}

/// An optional integer argument. Present with any other type is an error.
fn optional_integer(args: &Dict, key: &'static str) -> Result<Option<i64>, KrpcError> {
    match args.get(key.as_bytes()) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .map(Some)
            .ok_or(KrpcError::InvalidField(key)),
    }
}

fn parse_query(dict: &Dict) -> Result<Query, KrpcError> {
    let method = bytes_field(dict, "q")?;
    let args = dict
        .get(&b"a"[..])
        .ok_or(KrpcError::MissingField("a"))?
        .as_dict()
        .ok_or(KrpcError::InvalidField("a"))?;
    let id = args
        .get(&b"id"[..])
        .and_then(Value::as_bytes)
        .map(<[u8]>::to_vec);

    let query = match method {
        b"ping" => Query::Ping { id },
        b"find_node" => Query::FindNode { id },
        b"get_peers" => Query::GetPeers {
            id,
            info_hash: info_hash_field(args)?,
        },
        b"announce_peer" => Query::AnnouncePeer {
            id,
            info_hash: info_hash_field(args)?,
            port: optional_integer(args, "port")?,
            implied_port: args
                .get(&b"implied_port"[..])
                .and_then(Value::as_integer),
            token: args
                .get(&b"token"[..])
                .and_then(Value::as_bytes)
                .map(<[u8]>::to_vec),
        },
        other => Query::Other(other.to_vec()),
    };
    Ok(query)
}

/// A node learnt from compact node info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactNode {
    pub id: NodeId,
    pub addr: SocketAddrV4,
}

/// Decodes a compact node info string.
///
/// Each 26-byte record is a 20-byte id, a big-endian IPv4 address and a
/// big-endian port. A string whose length is not a multiple of 26 yields no
/// records at all rather than a partial parse.
pub fn decode_compact_nodes(nodes: &[u8]) -> Vec<CompactNode> {
    if nodes.len() % COMPACT_NODE_LEN != 0 {
        return Vec::new();
    }

    nodes
        .chunks_exact(COMPACT_NODE_LEN)
        .map(|record| {
            let mut id = [0u8; ID_LEN];
            id.copy_from_slice(&record[..ID_LEN]);
            let ip = Ipv4Addr::new(record[20], record[21], record[22], record[23]);
            let port = u16::from_be_bytes([record[24], record[25]]);
            CompactNode {
                id: NodeId::from(id),
                addr: SocketAddrV4::new(ip, port),
            }
        })
        .collect()
}

/// Builds a `find_node` query.
///
/// # Arguments
///
/// * `transaction_id` - Opaque id for the `t` field.
/// * `id` - Id we present ourselves with.
/// * `target` - Node id being searched for.
pub fn find_node_query(transaction_id: &[u8], id: &NodeId, target: &NodeId) -> Value {
    Value::dict([
        ("t", Value::bytes(transaction_id)),
        ("y", Value::from("q")),
        ("q", Value::from("find_node")),
        (
            "a",
            Value::dict([
                ("id", Value::bytes(id.as_bytes())),
                ("target", Value::bytes(target.as_bytes())),
            ]),
        ),
    ])
}

/// Wraps a result dictionary into a response echoing `transaction_id`.
pub fn response(transaction_id: &[u8], result: Dict) -> Value {
    Value::dict([
        ("t", Value::bytes(transaction_id)),
        ("y", Value::from("r")),
        ("r", Value::Dict(result)),
    ])
}
