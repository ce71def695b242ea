//! Bencode value model and codec.
//!
//! Both wire protocols spoken by the spider carry bencode: KRPC datagrams on
//! the DHT side and the extension handshake and `ut_metadata` headers on the
//! peer-wire side. The codec here is deliberately small. It decodes into the
//! [`Value`] tagged union and encodes dictionaries in canonical (sorted key)
//! order, which DHT nodes expect from well-behaved queriers.
//!
//! # Example
//!
//! ```
//! use dht_spider_protocol::bencode::{decode, encode, Value};
//!
//! let value = Value::dict([("id", Value::bytes(b"abcdefghij0123456789"))]);
//! let encoded = encode(&value);
//! assert_eq!(&encoded[..6], b"d2:id2");
//! assert_eq!(decode(&encoded).unwrap(), value);
//! ```

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, MAX_DEPTH};
pub use encode::encode;
pub use error::DecodeError;
pub use value::{Dict, Value};
