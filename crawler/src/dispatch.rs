//! KRPC dispatch: turns one inbound datagram into at most one action.
//!
//! Everything here is synchronous and free of I/O so the crawler loops only
//! move bytes between the socket and the queues.

use dht_spider_protocol::bencode::{self, Dict, Value};
use dht_spider_protocol::krpc::{self, Body, KrpcError, Message, Query};
use dht_spider_protocol::{neighbor_id, transaction_id, InfoHash, NodeId, TokenSecret};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// An info-hash announced by a peer, with the TCP address it can be fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPair {
    pub info_hash: InfoHash,
    pub peer: SocketAddr,
}

impl fmt::Display for HashPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.info_hash, self.peer)
    }
}

/// Where an outbound query goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A node learnt from compact node info.
    Resolved(SocketAddr),
    /// A `host:port` seed, resolved when the query is sent.
    Host(String),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Resolved(addr) => write!(f, "{addr}"),
            Destination::Host(host) => write!(f, "{host}"),
        }
    }
}

/// An encoded query waiting for the query sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundQuery {
    pub destination: Destination,
    pub payload: Vec<u8>,
}

/// A response waiting for the response sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    pub destination: SocketAddr,
    pub transaction_id: Vec<u8>,
    pub result: Dict,
}

impl OutboundResponse {
    pub fn encode(&self) -> Vec<u8> {
        bencode::encode(&krpc::response(
            &self.transaction_id,
            self.result.clone(),
        ))
    }
}

/// A decoded datagram and its sender.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub source: SocketAddr,
    pub value: Value,
}

/// What the crawler should do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Answer the querier.
    Respond(OutboundResponse),
    /// Hand an announced hash to the fetch pool.
    Harvest(HashPair),
    /// Walk on to the nodes a response told us about.
    Explore(Vec<OutboundQuery>),
}

/// Reasons a message is dropped without action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Not a well-formed KRPC message.
    Malformed(KrpcError),
    /// A KRPC error message.
    RemoteError,
    /// A query method we do not answer.
    UnknownMethod(Vec<u8>),
    /// `announce_peer` port outside `1..65535`.
    InvalidPort(i64),
    /// `announce_peer` token absent or not issued by us.
    InvalidToken,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Malformed(err) => write!(f, "{err}"),
            DispatchError::RemoteError => write!(f, "KRPC error message"),
            DispatchError::UnknownMethod(method) => {
                write!(f, "Unknown query method {}", String::from_utf8_lossy(method))
            }
            DispatchError::InvalidPort(port) => write!(f, "Invalid announce port {port}"),
            DispatchError::InvalidToken => write!(f, "Invalid announce token"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Malformed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KrpcError> for DispatchError {
    fn from(err: KrpcError) -> Self {
        DispatchError::Malformed(err)
    }
}

/// Running totals for the periodic status log.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub queries_sent: AtomicU64,
    pub responses_sent: AtomicU64,
    pub hashes_harvested: AtomicU64,
    pub records_ingested: AtomicU64,
    pub messages_dropped: AtomicU64,
}

impl CrawlStats {
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} queries sent, {} responses sent, {} hashes harvested, {} records ingested, {} messages dropped",
            self.queries_sent.load(Ordering::Relaxed),
            self.responses_sent.load(Ordering::Relaxed),
            self.hashes_harvested.load(Ordering::Relaxed),
            self.records_ingested.load(Ordering::Relaxed),
            self.messages_dropped.load(Ordering::Relaxed),
        )
    }
}

/// Resolves the TCP port an `announce_peer` refers to.
///
/// A non-zero `implied_port` means the UDP source port; otherwise the
/// declared `port`, falling back to the source port when none was given.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidPort`] unless the port is in `1..65535`.
pub fn announce_port(
    source_port: u16,
    port: Option<i64>,
    implied_port: Option<i64>,
) -> Result<u16, DispatchError> {
    let port = match (implied_port, port) {
        (Some(implied), _) if implied != 0 => i64::from(source_port),
        (_, Some(port)) => port,
        _ => i64::from(source_port),
    };
    if port <= 0 || port >= 65535 {
        return Err(DispatchError::InvalidPort(port));
    }
    Ok(port as u16)
}

/// Stateless KRPC dispatcher for one crawler identity.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    id: NodeId,
    secret: TokenSecret,
    verify_tokens: bool,
}

impl Dispatcher {
    pub fn new(id: NodeId, secret: TokenSecret, verify_tokens: bool) -> Self {
        Self {
            id,
            secret,
            verify_tokens,
        }
    }

    /// Our id as presented to a querier: a neighbor of its own id when it
    /// sent a usable one.
    fn self_neighbor_id(&self, querier: Option<&[u8]>) -> NodeId {
        querier
            .and_then(|id| neighbor_id(&self.id, id))
            .unwrap_or(self.id)
    }

    /// A `find_node` for a random target. Toward a known node we present
    /// ourselves as its neighbor, otherwise with our own id.
    pub fn find_node(&self, destination: Destination, node_id: Option<&NodeId>) -> OutboundQuery {
        let id = node_id
            .and_then(|node| neighbor_id(&self.id, node.as_bytes()))
            .unwrap_or(self.id);
        let query = krpc::find_node_query(&transaction_id(), &id, &NodeId::random());
        OutboundQuery {
            destination,
            payload: bencode::encode(&query),
        }
    }

    /// Bootstrap query toward a seed `host:port`.
    pub fn seed_query(&self, host: &str) -> OutboundQuery {
        self.find_node(Destination::Host(host.to_string()), None)
    }

    fn respond(source: SocketAddr, transaction_id: Vec<u8>, entries: Vec<(&str, Value)>) -> Action {
        Action::Respond(OutboundResponse {
            destination: source,
            transaction_id,
            result: entries
                .into_iter()
                .map(|(key, value)| (key.as_bytes().to_vec(), value))
                .collect(),
        })
    }

    /// Decides what to do with one decoded datagram.
    pub fn dispatch(&self, source: SocketAddr, value: &Value) -> Result<Action, DispatchError> {
        let message = Message::from_value(value)?;
        let transaction_id = message.transaction_id;

        match message.body {
            Body::Query(Query::Ping { id }) => Ok(Self::respond(
                source,
                transaction_id,
                vec![(
                    "id",
                    Value::bytes(self.self_neighbor_id(id.as_deref()).as_bytes()),
                )],
            )),
            Body::Query(Query::FindNode { id }) => Ok(Self::respond(
                source,
                transaction_id,
                vec![
                    (
                        "id",
                        Value::bytes(self.self_neighbor_id(id.as_deref()).as_bytes()),
                    ),
                    ("nodes", Value::bytes(b"")),
                ],
            )),
            Body::Query(Query::GetPeers { info_hash, .. }) => {
                let id = self.self_neighbor_id(Some(&info_hash.as_bytes()[..]));
                Ok(Self::respond(
                    source,
                    transaction_id,
                    vec![
                        ("id", Value::bytes(id.as_bytes())),
                        ("token", Value::bytes(self.secret.token(&source.ip()))),
                        ("nodes", Value::bytes(b"")),
                    ],
                ))
            }
            Body::Query(Query::AnnouncePeer {
                info_hash,
                port,
                implied_port,
                token,
                ..
            }) => {
                if self.verify_tokens {
                    let valid = token
                        .as_deref()
                        .is_some_and(|token| self.secret.verify(&source.ip(), token));
                    if !valid {
                        return Err(DispatchError::InvalidToken);
                    }
                }
                let port = announce_port(source.port(), port, implied_port)?;
                Ok(Action::Harvest(HashPair {
                    info_hash,
                    peer: SocketAddr::new(source.ip(), port),
                }))
            }
            Body::Query(Query::Other(method)) => Err(DispatchError::UnknownMethod(method)),
            Body::Response(result) => {
                let queries = match result.get(&b"nodes"[..]).and_then(Value::as_bytes) {
                    Some(nodes) => krpc::decode_compact_nodes(nodes)
                        .into_iter()
                        .filter(|node| node.addr.port() > 0 && node.addr.port() < 65535)
                        .map(|node| {
                            self.find_node(
                                Destination::Resolved(SocketAddr::V4(node.addr)),
                                Some(&node.id),
                            )
                        })
                        .collect(),
                    None => Vec::new(),
                };
                Ok(Action::Explore(queries))
            }
            Body::Error => Err(DispatchError::RemoteError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht_spider_protocol::bencode::decode;
    use std::net::{IpAddr, Ipv4Addr};

    const SELF_ID: [u8; 20] = [0xaa; 20];

    fn dispatcher(verify_tokens: bool) -> Dispatcher {
        Dispatcher::new(
            NodeId::from(SELF_ID),
            TokenSecret::new(b"secret".to_vec()),
            verify_tokens,
        )
    }

    fn source() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 40000)
    }

    fn query(method: &str, args: Value) -> Value {
        Value::dict([
            ("t", Value::bytes(b"tx")),
            ("y", Value::from("q")),
            ("q", Value::from(method)),
            ("a", args),
        ])
    }

    fn announce(port: Option<i64>, implied_port: Option<i64>, token: Option<&[u8]>) -> Value {
        let mut args = Dict::new();
        args.insert(b"id".to_vec(), Value::bytes([1u8; 20]));
        args.insert(b"info_hash".to_vec(), Value::bytes([9u8; 20]));
        if let Some(port) = port {
            args.insert(b"port".to_vec(), Value::Integer(port));
        }
        if let Some(implied) = implied_port {
            args.insert(b"implied_port".to_vec(), Value::Integer(implied));
        }
        if let Some(token) = token {
            args.insert(b"token".to_vec(), Value::bytes(token));
        }
        query("announce_peer", Value::Dict(args))
    }

    fn expect_response(action: Action) -> OutboundResponse {
        match action {
            Action::Respond(response) => response,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[test]
    fn test_announce_port_resolution() {
        assert_eq!(announce_port(40000, Some(0), None), Err(DispatchError::InvalidPort(0)));
        assert_eq!(
            announce_port(40000, Some(65535), None),
            Err(DispatchError::InvalidPort(65535))
        );
        assert_eq!(
            announce_port(40000, Some(65536), None),
            Err(DispatchError::InvalidPort(65536))
        );
        assert_eq!(
            announce_port(40000, Some(-1), None),
            Err(DispatchError::InvalidPort(-1))
        );
        assert_eq!(announce_port(40000, Some(1), None), Ok(1));
        assert_eq!(announce_port(40000, Some(65534), None), Ok(65534));

        // Implied port wins over the declared one.
        assert_eq!(announce_port(40000, Some(6881), Some(1)), Ok(40000));
        assert_eq!(announce_port(40000, Some(0), Some(1)), Ok(40000));
        // A zero flag falls back to the declared port.
        assert_eq!(announce_port(40000, Some(6881), Some(0)), Ok(6881));
        // Nothing declared means the source port.
        assert_eq!(announce_port(40000, None, None), Ok(40000));
        assert_eq!(announce_port(0, None, None), Err(DispatchError::InvalidPort(0)));
    }

    #[test]
    fn test_ping_echoes_transaction_id() {
        let querier = [0x11u8; 20];
        let action = dispatcher(false)
            .dispatch(source(), &query("ping", Value::dict([("id", Value::bytes(querier))])))
            .unwrap();
        let response = expect_response(action);

        assert_eq!(response.destination, source());
        assert_eq!(response.transaction_id, b"tx");
        let id = response.result.get(&b"id"[..]).and_then(Value::as_bytes).unwrap();
        assert_eq!(&id[..15], &querier[..15]);
        assert_eq!(&id[15..], &SELF_ID[15..]);

        let encoded = decode(&response.encode()).unwrap();
        assert_eq!(encoded.get(b"y").and_then(Value::as_str), Some("r"));
        assert_eq!(encoded.get(b"t").and_then(Value::as_bytes), Some(&b"tx"[..]));
    }

    #[test]
    fn test_ping_with_short_id_uses_own_id() {
        let action = dispatcher(false)
            .dispatch(source(), &query("ping", Value::dict([("id", Value::bytes(b"short"))])))
            .unwrap();
        let response = expect_response(action);
        assert_eq!(
            response.result.get(&b"id"[..]).and_then(Value::as_bytes),
            Some(&SELF_ID[..])
        );
    }

    #[test]
    fn test_find_node_answers_empty_nodes() {
        let action = dispatcher(false)
            .dispatch(
                source(),
                &query("find_node", Value::dict([("target", Value::bytes([3u8; 20]))])),
            )
            .unwrap();
        let response = expect_response(action);
        assert_eq!(
            response.result.get(&b"nodes"[..]).and_then(Value::as_bytes),
            Some(&b""[..])
        );
        assert_eq!(
            response.result.get(&b"id"[..]).and_then(Value::as_bytes),
            Some(&SELF_ID[..])
        );
    }

    #[test]
    fn test_get_peers_issues_token() {
        let dispatcher = dispatcher(false);
        let action = dispatcher
            .dispatch(
                source(),
                &query("get_peers", Value::dict([("info_hash", Value::bytes([9u8; 20]))])),
            )
            .unwrap();
        let response = expect_response(action);

        let token = response.result.get(&b"token"[..]).and_then(Value::as_bytes).unwrap();
        assert!(TokenSecret::new(b"secret".to_vec()).verify(&source().ip(), token));
        let id = response.result.get(&b"id"[..]).and_then(Value::as_bytes).unwrap();
        assert_eq!(&id[..15], &[9u8; 15]);

        assert_eq!(
            dispatcher.dispatch(source(), &query("get_peers", Value::dict([("id", Value::bytes([1u8; 20]))]))),
            Err(DispatchError::Malformed(KrpcError::MissingField("info_hash")))
        );
    }

    #[test]
    fn test_announce_peer_harvests() {
        let action = dispatcher(false)
            .dispatch(source(), &announce(Some(6881), None, None))
            .unwrap();
        assert_eq!(
            action,
            Action::Harvest(HashPair {
                info_hash: InfoHash::from([9u8; 20]),
                peer: SocketAddr::new(source().ip(), 6881),
            })
        );

        assert_eq!(
            dispatcher(false).dispatch(source(), &announce(Some(0), None, None)),
            Err(DispatchError::InvalidPort(0))
        );
    }

    #[test]
    fn test_announce_with_mistyped_port_dropped() {
        let args = Value::dict([
            ("id", Value::bytes([1u8; 20])),
            ("info_hash", Value::bytes([9u8; 20])),
            ("port", Value::from("6881")),
        ]);
        assert_eq!(
            dispatcher(false).dispatch(source(), &query("announce_peer", args)),
            Err(DispatchError::Malformed(KrpcError::InvalidField("port")))
        );
    }

    #[test]
    fn test_announce_token_verification() {
        let strict = dispatcher(true);
        assert_eq!(
            strict.dispatch(source(), &announce(Some(6881), None, None)),
            Err(DispatchError::InvalidToken)
        );
        assert_eq!(
            strict.dispatch(source(), &announce(Some(6881), None, Some(b"forged"))),
            Err(DispatchError::InvalidToken)
        );

        let token = TokenSecret::new(b"secret".to_vec()).token(&source().ip());
        assert!(matches!(
            strict.dispatch(source(), &announce(Some(6881), None, Some(&token))),
            Ok(Action::Harvest(_))
        ));
    }

    #[test]
    fn test_response_nodes_are_explored() {
        let mut nodes = Vec::new();
        for (byte, port) in [(1u8, 6881u16), (2, 0), (3, 65535), (4, 51413)] {
            nodes.extend_from_slice(&[byte; 20]);
            nodes.extend_from_slice(&[10, 0, 0, byte]);
            nodes.extend_from_slice(&port.to_be_bytes());
        }
        let message = Value::dict([
            ("t", Value::bytes(b"tx")),
            ("y", Value::from("r")),
            (
                "r",
                Value::dict([("id", Value::bytes([5u8; 20])), ("nodes", Value::bytes(nodes))]),
            ),
        ]);

        let queries = match dispatcher(false).dispatch(source(), &message).unwrap() {
            Action::Explore(queries) => queries,
            other => panic!("expected exploration, got {other:?}"),
        };
        let destinations: Vec<_> = queries.iter().map(|q| q.destination.clone()).collect();
        assert_eq!(
            destinations,
            vec![
                Destination::Resolved("10.0.0.1:6881".parse().unwrap()),
                Destination::Resolved("10.0.0.4:51413".parse().unwrap()),
            ]
        );

        let first = decode(&queries[0].payload).unwrap();
        assert_eq!(first.get(b"q").and_then(Value::as_str), Some("find_node"));
        let id = first.get(b"a").and_then(|a| a.get(b"id")).and_then(Value::as_bytes).unwrap();
        assert_eq!(&id[..15], &[1u8; 15]);
        assert_eq!(&id[15..], &SELF_ID[15..]);
    }

    #[test]
    fn test_response_without_usable_nodes() {
        let odd_length = Value::dict([
            ("t", Value::bytes(b"tx")),
            ("y", Value::from("r")),
            ("r", Value::dict([("nodes", Value::bytes([0u8; 27]))])),
        ]);
        assert_eq!(
            dispatcher(false).dispatch(source(), &odd_length),
            Ok(Action::Explore(Vec::new()))
        );

        let no_nodes = Value::dict([
            ("t", Value::bytes(b"tx")),
            ("y", Value::from("r")),
            ("r", Value::dict([("id", Value::bytes([5u8; 20]))])),
        ]);
        assert_eq!(
            dispatcher(false).dispatch(source(), &no_nodes),
            Ok(Action::Explore(Vec::new()))
        );
    }

    #[test]
    fn test_dropped_messages() {
        let dispatcher = dispatcher(false);
        let error = Value::dict([
            ("t", Value::bytes(b"tx")),
            ("y", Value::from("e")),
            ("e", Value::List(vec![Value::Integer(201), Value::from("Generic Error")])),
        ]);
        assert_eq!(dispatcher.dispatch(source(), &error), Err(DispatchError::RemoteError));

        assert_eq!(
            dispatcher.dispatch(source(), &query("vote", Value::dict([("id", Value::bytes([1u8; 20]))]))),
            Err(DispatchError::UnknownMethod(b"vote".to_vec()))
        );

        assert!(matches!(
            dispatcher.dispatch(source(), &Value::from("not a dict")),
            Err(DispatchError::Malformed(KrpcError::NotADict))
        ));
    }

    #[test]
    fn test_seed_query() {
        let query = dispatcher(false).seed_query("router.example.org:6881");
        assert_eq!(
            query.destination,
            Destination::Host("router.example.org:6881".into())
        );
        let decoded = decode(&query.payload).unwrap();
        let id = decoded.get(b"a").and_then(|a| a.get(b"id")).and_then(Value::as_bytes);
        assert_eq!(id, Some(&SELF_ID[..]));
        assert_eq!(decoded.get(b"t").and_then(Value::as_bytes).map(<[u8]>::len), Some(2));
    }
}
