//! Torrent descriptors extracted from a verified info dictionary.

use super::error::FetchError;
use crate::bencode::{self, Value};
use crate::primitives::InfoHash;
use std::fmt;

/// One file of a multi-file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Path components joined with `/`.
    pub name: String,
    pub length: i64,
}

/// Descriptor handed to the ingest boundary after a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentRecord {
    pub info_hash: InfoHash,
    pub name: String,
    /// Total payload size: `length` for single-file torrents, the sum of file
    /// lengths otherwise.
    pub length: i64,
    /// Empty for single-file torrents.
    pub files: Vec<TorrentFile>,
}

/// Prefers the `<key>.utf-8` variant some clients emit alongside `<key>`.
fn utf8_preferred<'a>(dict: &'a Value, key: &str) -> Option<&'a Value> {
    dict.get(format!("{key}.utf-8").as_bytes())
        .or_else(|| dict.get(key.as_bytes()))
}

fn lossy(value: &Value) -> Option<String> {
    value
        .as_bytes()
        .map(|b| String::from_utf8_lossy(b).into_owned())
}

fn parse_file(entry: &Value) -> Option<TorrentFile> {
    let length = entry.get(b"length")?.as_integer()?;
    let name = match utf8_preferred(entry, "path").and_then(Value::as_list) {
        Some(components) => components
            .iter()
            .map(lossy)
            .collect::<Option<Vec<_>>>()?
            .join("/"),
        None => lossy(utf8_preferred(entry, "name")?)?,
    };
    Some(TorrentFile { name, length })
}

impl TorrentRecord {
    /// Builds a record from raw info dictionary bytes.
    ///
    /// The caller is expected to have verified `metadata` against `info_hash`.
    ///
    /// # Errors
    ///
    /// * [`FetchError::Decode`] - `metadata` is not valid bencode.
    /// * [`FetchError::MissingField`] - Not a dictionary.
    pub fn from_info(info_hash: InfoHash, metadata: &[u8]) -> Result<Self, FetchError> {
        let info = bencode::decode(metadata)?;
        if info.as_dict().is_none() {
            return Err(FetchError::MissingField("info"));
        }

        // A nameless torrent is still worth recording.
        let name = utf8_preferred(&info, "name")
            .and_then(lossy)
            .unwrap_or_default();

        // Entries that are not dictionaries with a length are skipped.
        let files: Vec<TorrentFile> = info
            .get(b"files")
            .and_then(Value::as_list)
            .map(|entries| entries.iter().filter_map(parse_file).collect())
            .unwrap_or_default();

        let length = match info.get(b"length").and_then(Value::as_integer) {
            Some(length) => length,
            None => files.iter().map(|f| f.length).sum(),
        };

        Ok(TorrentRecord {
            info_hash,
            name,
            length,
            files,
        })
    }
}

impl fmt::Display for TorrentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" ({} bytes, {} files)",
            self.info_hash,
            self.name,
            self.length,
            self.files.len().max(1)
        )
    }
}
